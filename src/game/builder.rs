//! Round Builder
//!
//! Draws a match worth of rounds: distinct letters, each with a fixed number
//! of distinct categories that have dictionary coverage for that letter.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::core::rng::SeededRng;
use crate::game::state::{Category, RoomId, Round, RoundId, RoundStatus};
use crate::lexicon::{Lexicon, LexiconError};

/// Round building errors.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Not enough letters with the required category coverage.
    #[error("insufficient lexicon content: {available} letters have {required_categories}+ categories, {needed} needed")]
    InsufficientContent {
        /// Qualifying letters.
        available: usize,
        /// Rounds requested.
        needed: usize,
        /// Categories each round needs.
        required_categories: usize,
    },

    /// Zero rounds requested.
    #[error("a match needs at least one round")]
    NoRounds,

    /// Coverage could not be read.
    #[error(transparent)]
    Lexicon(#[from] LexiconError),
}

/// Builds rounds from lexicon coverage.
pub struct RoundBuilder {
    lexicon: Arc<dyn Lexicon>,
    categories_per_round: usize,
}

impl RoundBuilder {
    /// Create a builder drawing `categories_per_round` categories per round.
    pub fn new(lexicon: Arc<dyn Lexicon>, categories_per_round: usize) -> Self {
        Self {
            lexicon,
            categories_per_round,
        }
    }

    /// Build the rounds of a match, sequence numbers 1..=round_count.
    pub async fn build_rounds(
        &self,
        room_id: RoomId,
        round_count: usize,
        duration_secs: u32,
        rng: &mut SeededRng,
    ) -> Result<Vec<Round>, BuildError> {
        let coverage = self.lexicon.coverage().await?;
        let drawn = draw_rounds(&coverage, round_count, self.categories_per_round, rng)?;

        debug!(
            room = %room_id.short(),
            letters = ?drawn.iter().map(|(l, _)| *l).collect::<Vec<_>>(),
            "Rounds drawn"
        );

        Ok(drawn
            .into_iter()
            .enumerate()
            .map(|(i, (letter, categories))| Round {
                id: RoundId::random(),
                room_id,
                sequence: i as u32 + 1,
                letter,
                categories,
                status: RoundStatus::Ready,
                duration_secs,
            })
            .collect())
    }
}

/// Pick `round_count` letters and `per_round` categories for each.
///
/// Letters qualify when they cover at least `per_round` categories. Both
/// draws are uniform without replacement.
pub fn draw_rounds(
    coverage: &BTreeMap<char, Vec<Category>>,
    round_count: usize,
    per_round: usize,
    rng: &mut SeededRng,
) -> Result<Vec<(char, Vec<Category>)>, BuildError> {
    if round_count == 0 {
        return Err(BuildError::NoRounds);
    }

    let qualifying: Vec<char> = coverage
        .iter()
        .filter(|(_, categories)| categories.len() >= per_round)
        .map(|(letter, _)| *letter)
        .collect();

    if qualifying.len() < round_count {
        return Err(BuildError::InsufficientContent {
            available: qualifying.len(),
            needed: round_count,
            required_categories: per_round,
        });
    }

    let letters = rng.sample(&qualifying, round_count);

    Ok(letters
        .into_iter()
        .map(|letter| {
            let pool = coverage.get(&letter).map(Vec::as_slice).unwrap_or(&[]);
            (letter, rng.sample(pool, per_round))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::MemoryLexicon;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn coverage(letters: &str, categories: usize) -> BTreeMap<char, Vec<Category>> {
        letters
            .chars()
            .map(|l| {
                let cats = (0..categories as u32)
                    .map(|i| Category {
                        id: crate::game::state::CategoryId(i),
                        name: format!("cat-{}", i),
                    })
                    .collect();
                (l, cats)
            })
            .collect()
    }

    #[test]
    fn test_exact_qualifying_letters_is_enough() {
        let cov = coverage("ABC", 4);
        let mut rng = SeededRng::new(1);
        let rounds = draw_rounds(&cov, 3, 4, &mut rng).unwrap();

        let letters: BTreeSet<char> = rounds.iter().map(|(l, _)| *l).collect();
        assert_eq!(letters, "ABC".chars().collect());
    }

    #[test]
    fn test_insufficient_letters_fails() {
        let mut cov = coverage("AB", 4);
        cov.extend(coverage("C", 3));
        let mut rng = SeededRng::new(1);

        let result = draw_rounds(&cov, 3, 4, &mut rng);
        assert!(matches!(
            result,
            Err(BuildError::InsufficientContent { available: 2, needed: 3, .. })
        ));
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let mut rng = SeededRng::new(1);
        assert!(matches!(
            draw_rounds(&coverage("A", 4), 0, 4, &mut rng),
            Err(BuildError::NoRounds)
        ));
    }

    proptest! {
        #[test]
        fn prop_letters_and_categories_distinct(seed in any::<u64>(), rounds in 1usize..8) {
            let cov = coverage("ABCDEFGHIJ", 7);
            let mut rng = SeededRng::new(seed);
            let drawn = draw_rounds(&cov, rounds, 4, &mut rng).unwrap();

            let letters: BTreeSet<char> = drawn.iter().map(|(l, _)| *l).collect();
            prop_assert_eq!(letters.len(), rounds);

            for (_, categories) in &drawn {
                let ids: BTreeSet<_> = categories.iter().map(|c| c.id).collect();
                prop_assert_eq!(ids.len(), 4);
            }
        }
    }

    #[tokio::test]
    async fn test_build_rounds_sequences() {
        let mut lexicon = MemoryLexicon::new();
        let words = [
            ("Animal", ["Baleia", "Cobra", "Doninha"]),
            ("Fruta", ["Banana", "Caju", "Damasco"]),
            ("Cor", ["Bege", "Cinza", "Dourado"]),
            ("Pais", ["Brasil", "Chile", "Dinamarca"]),
        ];
        for (i, (name, list)) in words.iter().enumerate() {
            let id = lexicon.add_category(i as u32 + 1, *name);
            for w in list {
                lexicon.add_word(id, w);
            }
        }

        let builder = RoundBuilder::new(Arc::new(lexicon), 4);
        let room_id = RoomId::random();
        let mut rng = SeededRng::new(99);
        let rounds = builder.build_rounds(room_id, 3, 20, &mut rng).await.unwrap();

        let sequences: Vec<u32> = rounds.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
        assert!(rounds.iter().all(|r| r.status == RoundStatus::Ready));
        assert!(rounds.iter().all(|r| r.categories.len() == 4));
        assert!(rounds.iter().all(|r| r.room_id == room_id));
    }
}
