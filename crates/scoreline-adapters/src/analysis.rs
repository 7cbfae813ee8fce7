use async_trait::async_trait;
use chrono::Utc;
use scoreline_core::{Competition, Rating};

use crate::AnalysisService;

pub const EXCITEMENT_RATING: &str = "excitement";

/// Grades finished games from the box score alone: close, high-scoring games
/// rate best. Unfinished games get an empty rating, which callers skip.
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalysis;

impl HeuristicAnalysis {
    pub fn new() -> Self {
        Self
    }

    pub fn grade(home: u32, away: u32) -> (&'static str, String) {
        let margin = home.abs_diff(away);
        let total = home.saturating_add(away);
        let grade = match (margin, total) {
            (0..=3, t) if t >= 45 => "A+",
            (0..=3, _) => "A",
            (4..=8, t) if t >= 45 => "A-",
            (4..=8, _) => "B+",
            (9..=14, t) if t >= 50 => "B",
            (9..=14, _) => "B-",
            (15..=21, _) => "C",
            _ => "D",
        };
        (grade, format!("margin {margin}, combined points {total}"))
    }
}

#[async_trait]
impl AnalysisService for HeuristicAnalysis {
    fn rating_type(&self) -> &str {
        EXCITEMENT_RATING
    }

    async fn produce(&self, competition: &Competition) -> anyhow::Result<Rating> {
        let scores = competition
            .home()
            .and_then(|h| h.score)
            .zip(competition.away().and_then(|a| a.score));

        let (value, rationale) = match scores {
            Some((home, away)) if competition.is_final() => {
                let (grade, rationale) = Self::grade(home, away);
                (grade.to_string(), Some(rationale))
            }
            _ => (String::new(), None),
        };

        Ok(Rating {
            competition_id: competition.id,
            rating_type: EXCITEMENT_RATING.to_string(),
            value,
            rationale,
            generated_at: Utc::now(),
        })
    }
}
