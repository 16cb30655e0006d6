//! Requests a worker sends back to the map it works for. Glyphs and images live on the
//! main thread, so tiles wait for them before finishing their layout.

use crate::{
    atlas::{GlyphMap, ImageMap},
    error::Error,
    tile_id::{OverscaledTileId, TileUid},
};
use futures::{
    FutureExt as _,
    channel::{mpsc, oneshot},
    future::BoxFuture,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Icons,
    Patterns,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRequest {
    GetGlyphs {
        uid: TileUid,
        /// Code points by font stack.
        stacks: BTreeMap<String, BTreeSet<u32>>,
        source: String,
        tile_id: OverscaledTileId,
    },
    GetImages {
        icons: BTreeSet<String>,
        source: String,
        tile_id: OverscaledTileId,
        kind: ImageKind,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum DependencyResponse {
    Glyphs(GlyphMap),
    Images(ImageMap),
}

/// Sending side of the channel back to the main thread.
pub trait Actor: Send + Sync {
    /// Send a request to the map `target_map_id`, or to any map when `None`.
    fn send(
        &self,
        request: DependencyRequest,
        target_map_id: Option<&str>,
    ) -> BoxFuture<'static, Result<DependencyResponse, Error>>;
}

/// Actor bound to a single map.
#[derive(Clone)]
pub struct MapActor {
    actor: Arc<dyn Actor>,
    map_id: String,
}

impl MapActor {
    pub fn new(actor: Arc<dyn Actor>, map_id: impl Into<String>) -> Self {
        Self {
            actor,
            map_id: map_id.into(),
        }
    }

    pub fn map_id(&self) -> &str {
        &self.map_id
    }

    pub fn get_glyphs(
        &self,
        uid: TileUid,
        stacks: BTreeMap<String, BTreeSet<u32>>,
        source: String,
        tile_id: OverscaledTileId,
    ) -> BoxFuture<'static, Result<GlyphMap, Error>> {
        let request = DependencyRequest::GetGlyphs {
            uid,
            stacks,
            source,
            tile_id,
        };
        self.actor
            .send(request, Some(&self.map_id))
            .map(|response| match response? {
                DependencyResponse::Glyphs(glyphs) => Ok(glyphs),
                DependencyResponse::Images(_) => Err(Error::Dependency(
                    "Expected glyphs, got images.".to_owned(),
                )),
            })
            .boxed()
    }

    pub fn get_images(
        &self,
        icons: BTreeSet<String>,
        source: String,
        tile_id: OverscaledTileId,
        kind: ImageKind,
    ) -> BoxFuture<'static, Result<ImageMap, Error>> {
        let request = DependencyRequest::GetImages {
            icons,
            source,
            tile_id,
            kind,
        };
        self.actor
            .send(request, Some(&self.map_id))
            .map(|response| match response? {
                DependencyResponse::Images(images) => Ok(images),
                DependencyResponse::Glyphs(_) => Err(Error::Dependency(
                    "Expected images, got glyphs.".to_owned(),
                )),
            })
            .boxed()
    }
}

impl std::fmt::Debug for MapActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapActor")
            .field("map_id", &self.map_id)
            .finish_non_exhaustive()
    }
}

/// Dependency request as it leaves the worker thread.
#[derive(Debug)]
pub struct ActorMessage {
    pub request: DependencyRequest,
    pub target_map_id: Option<String>,
    pub reply: oneshot::Sender<Result<DependencyResponse, Error>>,
}

/// Actor which forwards requests over a channel, to be answered by whoever owns the
/// receiving end.
#[derive(Debug, Clone)]
pub struct ChannelActor {
    sender: mpsc::UnboundedSender<ActorMessage>,
}

impl ChannelActor {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ActorMessage>) {
        let (sender, receiver) = mpsc::unbounded();
        (Self { sender }, receiver)
    }
}

impl Actor for ChannelActor {
    fn send(
        &self,
        request: DependencyRequest,
        target_map_id: Option<&str>,
    ) -> BoxFuture<'static, Result<DependencyResponse, Error>> {
        let (reply, response) = oneshot::channel();
        let message = ActorMessage {
            request,
            target_map_id: target_map_id.map(str::to_owned),
            reply,
        };

        if self.sender.unbounded_send(message).is_err() {
            return futures::future::ready(Err(Error::Dependency(
                "Main thread is gone.".to_owned(),
            )))
            .boxed();
        }

        async move { response.await? }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_id::CanonicalTileId;
    use futures::StreamExt as _;

    fn tile_id() -> OverscaledTileId {
        OverscaledTileId::canonical(CanonicalTileId::new(3, 1, 2))
    }

    #[test]
    fn requests_go_through_the_channel() {
        let (actor, mut receiver) = ChannelActor::channel();
        let actor = MapActor::new(Arc::new(actor), "map-1");

        let images = actor.get_images(
            BTreeSet::from(["bus".to_owned()]),
            "composite".to_owned(),
            tile_id(),
            ImageKind::Icons,
        );

        futures::executor::block_on(async {
            let message = receiver.next().await.unwrap();
            assert_eq!(message.target_map_id.as_deref(), Some("map-1"));
            assert!(matches!(
                message.request,
                DependencyRequest::GetImages {
                    kind: ImageKind::Icons,
                    ..
                }
            ));
            message
                .reply
                .send(Ok(DependencyResponse::Images(ImageMap::new())))
                .unwrap();

            assert_eq!(images.await.unwrap(), ImageMap::new());
        });
    }

    #[test]
    fn mismatched_responses_are_dependency_errors() {
        let (actor, mut receiver) = ChannelActor::channel();
        let actor = MapActor::new(Arc::new(actor), "map-1");

        let glyphs = actor.get_glyphs(TileUid(1), BTreeMap::new(), "s".to_owned(), tile_id());

        futures::executor::block_on(async {
            let message = receiver.next().await.unwrap();
            message
                .reply
                .send(Ok(DependencyResponse::Images(ImageMap::new())))
                .unwrap();
            assert!(matches!(glyphs.await, Err(Error::Dependency(_))));
        });
    }

    #[test]
    fn dropped_replies_fail_the_request() {
        let (actor, receiver) = ChannelActor::channel();
        drop(receiver);

        let response = futures::executor::block_on(actor.send(
            DependencyRequest::GetImages {
                icons: BTreeSet::new(),
                source: "s".to_owned(),
                tile_id: tile_id(),
                kind: ImageKind::Patterns,
            },
            None,
        ));
        assert!(matches!(response, Err(Error::Dependency(_))));
    }
}
