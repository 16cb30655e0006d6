//! Collision boxes of symbols. Placement happens on the main thread, the worker only
//! collects them.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionBox {
    /// Anchor in tile units.
    pub anchor: [f32; 2],
    /// Extent around the anchor, in pixels.
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub feature_index: usize,
    pub source_layer_index: u32,
    pub bucket_index: usize,
}

impl CollisionBox {
    /// Corners, as drawn by the collision debug overlay.
    pub fn corners(&self) -> [[f32; 2]; 4] {
        [
            [self.x1, self.y1],
            [self.x2, self.y1],
            [self.x2, self.y2],
            [self.x1, self.y2],
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionBoxArray {
    boxes: Vec<CollisionBox>,
}

impl CollisionBoxArray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns index of the added box.
    pub fn push(&mut self, collision_box: CollisionBox) -> usize {
        self.boxes.push(collision_box);
        self.boxes.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&CollisionBox> {
        self.boxes.get(index)
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CollisionBox> {
        self.boxes.iter()
    }
}

impl<'a> IntoIterator for &'a CollisionBoxArray {
    type Item = &'a CollisionBox;
    type IntoIter = std::slice::Iter<'a, CollisionBox>;

    fn into_iter(self) -> Self::IntoIter {
        self.boxes.iter()
    }
}
