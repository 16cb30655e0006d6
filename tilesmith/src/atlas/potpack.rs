//! Shelf-free rectangle packing, after <https://github.com/mapbox/potpack>.

/// Rectangle to be placed in an atlas. `x` and `y` are filled in by [`potpack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bin {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Bin {
    pub fn new(w: u32, h: u32) -> Self {
        Self { x: 0, y: 0, w, h }
    }
}

#[derive(Debug, Clone, Copy)]
struct Space {
    x: u32,
    y: u32,
    w: u32,
    h: u32,
}

/// Place the bins into a roughly square area. Returns its width and height.
pub fn potpack(bins: &mut [Bin]) -> (u32, u32) {
    let area: u64 = bins.iter().map(|bin| u64::from(bin.w) * u64::from(bin.h)).sum();
    let max_width = bins.iter().map(|bin| bin.w).max().unwrap_or(0);

    // Tallest first, stable for equal heights.
    let mut order: Vec<usize> = (0..bins.len()).collect();
    order.sort_by(|&a, &b| bins[b].h.cmp(&bins[a].h));

    let start_width = ((area as f64 / 0.95).sqrt().ceil() as u32).max(max_width);

    let mut spaces = vec![Space {
        x: 0,
        y: 0,
        w: start_width,
        h: u32::MAX,
    }];

    let mut width = 0;
    let mut height = 0;

    for index in order {
        let bin = &mut bins[index];

        for i in (0..spaces.len()).rev() {
            let space = spaces[i];
            if bin.w > space.w || bin.h > space.h {
                continue;
            }

            bin.x = space.x;
            bin.y = space.y;
            height = height.max(bin.y + bin.h);
            width = width.max(bin.x + bin.w);

            if bin.w == space.w && bin.h == space.h {
                spaces.swap_remove(i);
            } else if bin.h == space.h {
                spaces[i].x += bin.w;
                spaces[i].w -= bin.w;
            } else if bin.w == space.w {
                spaces[i].y += bin.h;
                spaces[i].h -= bin.h;
            } else {
                spaces.push(Space {
                    x: space.x + bin.w,
                    y: space.y,
                    w: space.w - bin.w,
                    h: bin.h,
                });
                spaces[i].y += bin.h;
                spaces[i].h -= bin.h;
            }
            break;
        }
    }

    (width, height)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlap(a: &Bin, b: &Bin) -> bool {
        a.x < b.x + b.w && b.x < a.x + a.w && a.y < b.y + b.h && b.y < a.y + a.h
    }

    #[test]
    fn bins_do_not_overlap_and_fit() {
        let mut bins: Vec<Bin> = (1..30).map(|i| Bin::new(i % 7 + 2, i % 5 + 3)).collect();
        let (w, h) = potpack(&mut bins);

        for (i, a) in bins.iter().enumerate() {
            assert!(a.x + a.w <= w && a.y + a.h <= h);
            for b in &bins[i + 1..] {
                assert!(!overlap(a, b), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn nothing_to_pack() {
        assert_eq!(potpack(&mut []), (0, 0));
    }

    #[test]
    fn single_bin_sits_in_the_corner() {
        let mut bins = [Bin::new(10, 4)];
        assert_eq!(potpack(&mut bins), (10, 4));
        assert_eq!((bins[0].x, bins[0].y), (0, 0));
    }
}
