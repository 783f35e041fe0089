use crate::demographics::domain::age_category::{rounded_age, AgeCategory};
use crate::detection::domain::face_analyzer::BoundingBox;

/// Label shown while an unmatched face is being registered.
pub const REGISTERING_LABEL: &str = "registering...";

/// Drawable summary of one face from the last completed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedBox {
    pub bbox: BoundingBox,
    pub label: String,
    /// Match distance for recognized faces; 0 otherwise.
    pub score: f64,
    pub age: f32,
    pub gender: String,
    pub gender_probability: f32,
    pub category: Option<AgeCategory>,
}

impl CachedBox {
    pub fn caption(&self) -> String {
        if self.score > 0.0 {
            format!("{} ({:.2})", self.label, self.score)
        } else {
            self.label.clone()
        }
    }

    pub fn detail(&self) -> String {
        let age = rounded_age(self.age).unwrap_or(0);
        match self.category {
            Some(category) => format!("{age}y {} \u{2022} {}", self.gender, category.label()),
            None => format!("{age} years, {}", self.gender),
        }
    }
}

/// Draws cached face boxes over the live video.
pub trait OverlayRenderer {
    fn clear(&mut self);
    fn draw(&mut self, boxes: &[CachedBox]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn cached(label: &str, score: f64, age: f32, category: Option<AgeCategory>) -> CachedBox {
        CachedBox {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
            label: label.to_string(),
            score,
            age,
            gender: "male".to_string(),
            gender_probability: 0.9,
            category,
        }
    }

    #[rstest]
    #[case("user3", 0.4213, "user3 (0.42)")]
    #[case(REGISTERING_LABEL, 0.0, "registering...")]
    fn test_caption(#[case] label: &str, #[case] score: f64, #[case] expected: &str) {
        assert_eq!(cached(label, score, 30.0, None).caption(), expected);
    }

    #[test]
    fn test_detail_with_category() {
        let b = cached("user1", 0.3, 30.6, Some(AgeCategory::Adults));
        assert_eq!(b.detail(), "31y male \u{2022} Adults");
    }

    #[test]
    fn test_detail_without_category() {
        let b = cached("user1", 0.3, 61.2, None);
        assert_eq!(b.detail(), "61 years, male");
    }
}
