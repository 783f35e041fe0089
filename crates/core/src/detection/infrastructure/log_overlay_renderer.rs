use crate::detection::domain::overlay::{CachedBox, OverlayRenderer};

/// Headless overlay that reports what would be drawn through `log`.
#[derive(Debug, Default)]
pub struct LogOverlayRenderer {
    draws: usize,
    boxes_drawn: usize,
}

impl LogOverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn draws(&self) -> usize {
        self.draws
    }

    pub fn boxes_drawn(&self) -> usize {
        self.boxes_drawn
    }
}

impl OverlayRenderer for LogOverlayRenderer {
    fn clear(&mut self) {}

    fn draw(&mut self, boxes: &[CachedBox]) {
        self.draws += 1;
        self.boxes_drawn += boxes.len();
        for b in boxes {
            log::debug!(
                "[{:.0},{:.0} {:.0}x{:.0}] {} | {}",
                b.bbox.x,
                b.bbox.y,
                b.bbox.width,
                b.bbox.height,
                b.caption(),
                b.detail()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::face_analyzer::BoundingBox;

    #[test]
    fn test_counts_draws_and_boxes() {
        let b = CachedBox {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 5.0,
                height: 5.0,
            },
            label: "user1".into(),
            score: 0.2,
            age: 20.0,
            gender: "female".into(),
            gender_probability: 0.7,
            category: None,
        };
        let mut overlay = LogOverlayRenderer::new();

        overlay.clear();
        overlay.draw(&[b.clone(), b]);
        overlay.draw(&[]);

        assert_eq!(overlay.draws(), 2);
        assert_eq!(overlay.boxes_drawn(), 2);
    }
}
