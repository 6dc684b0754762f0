use super::item::{BucketTag, WorkItem};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::trace;

/// Reference work item: a positioned sprite whose update costs its bucket's duration
#[derive(Debug, Clone)]
pub struct Sprite {
    pub x: i64,
    pub y: i64,
    pub dx: i64,
    pub dy: i64,
    /// Completed updates
    pub updates: u64,
    tag: Arc<BucketTag>,
}

impl Sprite {
    /// Sprite at the origin that does not move
    pub fn new(tag: Arc<BucketTag>) -> Self {
        Self {
            x: 0,
            y: 0,
            dx: 0,
            dy: 0,
            updates: 0,
            tag,
        }
    }

    pub fn with_velocity(mut self, dx: i64, dy: i64) -> Self {
        self.dx = dx;
        self.dy = dy;
        self
    }

    pub fn position(&self) -> (i64, i64) {
        (self.x, self.y)
    }

    pub fn bucket_name(&self) -> &str {
        &self.tag.name
    }

    pub fn tag(&self) -> &Arc<BucketTag> {
        &self.tag
    }
}

#[async_trait]
impl WorkItem for Sprite {
    async fn update(&mut self) -> anyhow::Result<()> {
        if !self.tag.duration.is_zero() {
            tokio::time::sleep(self.tag.duration).await;
        }
        self.x += self.dx;
        self.y += self.dy;
        self.updates += 1;
        trace!(bucket = %self.tag.name, x = self.x, y = self.y, "sprite updated");
        Ok(())
    }
}

/// Build `count` stationary sprites bound to `tag`
pub fn spawn_sprites(tag: &Arc<BucketTag>, count: usize) -> Vec<Sprite> {
    (0..count).map(|_| Sprite::new(tag.clone())).collect()
}
