use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::models::content::{ContentItem, ContentSource, ContentStyle};

struct Template {
    content: &'static str,
    hashtags: &'static [&'static str],
    topics: &'static [&'static str],
    quality_score: i32,
}

const TEMPLATES: &[Template] = &[
    Template {
        content: "Learn one framework well and you can ship a side project with free tools. Start small today 🚀",
        hashtags: &["#Programming", "#SideProject"],
        topics: &["tech", "business"],
        quality_score: 85,
    },
    Template {
        content: "Edge AI lets phones run language models offline. Better privacy and lower latency are coming 🤖📱",
        hashtags: &["#AI", "#Tech"],
        topics: &["ai", "tech"],
        quality_score: 78,
    },
    Template {
        content: "Thirty minutes of practice a day adds up to a new skill within a year. Consistency beats talent 📚✨",
        hashtags: &["#Learning", "#Growth"],
        topics: &["learning"],
        quality_score: 92,
    },
    Template {
        content: "Chasing highs and panic selling is the classic trap. Hold quality assets and let time do the work 📈",
        hashtags: &["#Investing", "#Finance"],
        topics: &["business"],
        quality_score: 76,
    },
    Template {
        content: "Health is more than workouts: sleep and eating windows matter just as much. What changed yours? 💪🥗",
        hashtags: &["#Health", "#Wellbeing"],
        topics: &["health"],
        quality_score: 81,
    },
    Template {
        content: "The best trips start with one local meal nobody recommended. Where did you last get lost on purpose? ✈️",
        hashtags: &["#Travel", "#Food"],
        topics: &["travel", "food"],
        quality_score: 74,
    },
    Template {
        content: "A song you loved at sixteen still knows exactly where to find you. Which one is yours? 🎧",
        hashtags: &["#Music"],
        topics: &["music"],
        quality_score: 70,
    },
    Template {
        content: "Good design is invisible until it is missing. Notice one thing today that just works 🎨",
        hashtags: &["#Design", "#UX"],
        topics: &["design"],
        quality_score: 83,
    },
];

/// Lowest score a mock item can start with; mock scores fall in 75..100.
const MOCK_SCORE_FLOOR: i32 = 75;
const MOCK_SCORE_SPREAD: i32 = 25;

/// Synthetic content for mock mode and for degradation when generation fails.
///
/// Selection is driven by a seeded RNG so a fixed seed gives a fixed ordering.
pub struct FallbackGenerator {
    rng: Mutex<StdRng>,
}

impl FallbackGenerator {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { rng: Mutex::new(rng) }
    }

    pub fn library_size(&self) -> usize {
        TEMPLATES.len()
    }

    pub fn pick(&self, count: usize, source: ContentSource) -> Vec<ContentItem> {
        self.pick_at(count, source, Utc::now())
    }

    /// Up to `count` distinct templates in shuffled order. Mock items get a
    /// randomised starting score; everything else keeps the template's score.
    pub fn pick_at(&self, count: usize, source: ContentSource, now: DateTime<Utc>) -> Vec<ContentItem> {
        let mut rng = self.rng.lock();
        let mut order: Vec<usize> = (0..TEMPLATES.len()).collect();
        order.shuffle(&mut *rng);

        order
            .into_iter()
            .take(count)
            .map(|template_index| {
                let template = &TEMPLATES[template_index];
                let quality_score = match source {
                    ContentSource::Mock => MOCK_SCORE_FLOOR + rng.random_range(0..MOCK_SCORE_SPREAD),
                    _ => template.quality_score,
                };
                ContentItem {
                    id: format!("{}_{}", source.as_str(), Uuid::new_v4().simple()),
                    content: template.content.to_string(),
                    hashtags: template.hashtags.iter().map(|t| t.to_string()).collect(),
                    topics: template.topics.iter().map(|t| t.to_string()).collect(),
                    likes: 0,
                    dislikes: 0,
                    quality_score,
                    generated_at: now,
                    style: ContentStyle::Casual,
                    used_by: Vec::new(),
                    reuse_count: 0,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_order() {
        let now = Utc::now();
        let a = FallbackGenerator::new(Some(7)).pick_at(5, ContentSource::Mock, now);
        let b = FallbackGenerator::new(Some(7)).pick_at(5, ContentSource::Mock, now);
        let key = |items: &[ContentItem]| -> Vec<(String, i32)> {
            items.iter().map(|i| (i.content.clone(), i.quality_score)).collect()
        };
        assert_eq!(key(&a), key(&b));
        assert_ne!(a[0].id, b[0].id);
    }

    #[test]
    fn test_picks_are_distinct_and_capped_by_library() {
        let generator = FallbackGenerator::new(Some(1));
        let items = generator.pick(50, ContentSource::Fallback);
        assert_eq!(items.len(), generator.library_size());
        let mut contents: Vec<_> = items.iter().map(|i| i.content.clone()).collect();
        contents.sort();
        contents.dedup();
        assert_eq!(contents.len(), generator.library_size());
    }

    #[test]
    fn test_fallback_keeps_template_scores() {
        let items = FallbackGenerator::new(Some(3)).pick(8, ContentSource::Fallback);
        for item in &items {
            let template = TEMPLATES.iter().find(|t| t.content == item.content).unwrap();
            assert_eq!(item.quality_score, template.quality_score);
            assert!(item.id.starts_with("fallback_"));
        }
    }

    #[test]
    fn test_mock_scores_in_range() {
        let generator = FallbackGenerator::new(Some(11));
        for _ in 0..20 {
            for item in generator.pick(3, ContentSource::Mock) {
                assert!((75..100).contains(&item.quality_score));
                assert!(item.id.starts_with("mock_"));
            }
        }
    }

    #[test]
    fn test_zero_count_is_empty() {
        assert!(FallbackGenerator::new(None).pick(0, ContentSource::Fallback).is_empty());
    }
}
