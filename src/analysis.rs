//! 計測・評価用のユーティリティ群。
use ndarray::Array2;
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::pipeline::types::{DurationUnit, ItemRecord};

/// Synthetic catalog with a known theme per item.
#[derive(Debug, Clone)]
pub struct SyntheticCatalog {
    pub items: Vec<ItemRecord>,
    /// Generating theme per item.
    pub themes: Vec<usize>,
    /// Row-aligned embedding block clustered around one centre per theme.
    pub embeddings: Array2<f64>,
}

struct Theme {
    share: f64,
    unit: DurationUnit,
    duration: (u32, u32),
    genres: &'static [&'static str],
    phrases: &'static [&'static str],
}

const THEMES: [Theme; 4] = [
    Theme {
        share: 0.55,
        unit: DurationUnit::Minutes,
        duration: (85, 160),
        genres: &["Dramas", "International Movies", "Romantic Movies"],
        phrases: &[
            "a grieving widow rebuilds her family farm",
            "two rival lawyers fall in love during a bitter trial",
            "an ambitious surgeon risks her career for a patient",
            "estranged brothers reunite for their father's funeral",
        ],
    },
    Theme {
        share: 0.20,
        unit: DurationUnit::Seasons,
        duration: (1, 4),
        genres: &["Docuseries", "Science & Nature TV"],
        phrases: &[
            "filmmakers follow wildlife across frozen oceans",
            "investigators revisit an unsolved murder case",
            "scientists explore the hidden life of coral reefs",
            "archival footage traces the rise of a music legend",
        ],
    },
    Theme {
        share: 0.15,
        unit: DurationUnit::Minutes,
        duration: (20, 95),
        genres: &["Children & Family Movies", "Comedies"],
        phrases: &[
            "a clumsy dragon learns to fly with help from friends",
            "talking animals plan a rescue mission at the zoo",
            "a young inventor builds a robot for the science fair",
            "siblings discover a magical door in the attic",
        ],
    },
    Theme {
        share: 0.10,
        unit: DurationUnit::Minutes,
        duration: (45, 80),
        genres: &["Stand-Up Comedy"],
        phrases: &[
            "the comedian riffs on parenting and airport security",
            "a stand-up special about dating apps and therapy",
            "sharp jokes on politics, marriage and fast food",
            "the comic reflects on growing up in a small town",
        ],
    },
];

/// 合成カタログを生成する。
///
/// # Arguments
/// * `count` - 生成するアイテム数
/// * `embedding_dims` - 埋め込みブロックの次元数
/// * `seed` - 乱数シード
#[must_use]
pub fn synthetic_catalog(count: usize, embedding_dims: usize, seed: u64) -> SyntheticCatalog {
    let mut rng = StdRng::seed_from_u64(seed);
    let dims = embedding_dims.max(1);
    let mut items = Vec::with_capacity(count);
    let mut themes = Vec::with_capacity(count);
    let mut embeddings = Array2::<f64>::zeros((count, dims));

    for row in 0..count {
        let theme_index = pick_theme(&mut rng);
        let theme = &THEMES[theme_index];

        let phrase = theme.phrases[rng.random_range(0..theme.phrases.len())];
        let genre_count = rng.random_range(1..=theme.genres.len());
        let release_year: u32 = rng.random_range(1980..=2021);
        let delay: u32 = rng.random_range(0..=12_u32).min(2021 - release_year);
        let duration: u32 = rng.random_range(theme.duration.0..=theme.duration.1);

        // 約5%の欠損を混ぜる
        let missing = |rng: &mut StdRng| rng.random::<f64>() < 0.05;
        items.push(ItemRecord {
            id: format!("s{}", row + 1),
            title: format!("Synthetic Title {}", row + 1),
            description: format!("{phrase}; {}", theme.genres[..genre_count].join(", ")),
            duration_value: (!missing(&mut rng)).then_some(f64::from(duration)),
            duration_unit: theme.unit,
            release_year: Some(f64::from(release_year)),
            genre_count: Some(genre_count as f64),
            delay_years: (!missing(&mut rng)).then_some(f64::from(delay)),
        });
        themes.push(theme_index);

        for col in 0..dims {
            let centre = if col % THEMES.len() == theme_index { 3.0 } else { 0.0 };
            embeddings[[row, col]] = centre + rng.random_range(-0.5..0.5);
        }
    }

    SyntheticCatalog {
        items,
        themes,
        embeddings,
    }
}

fn pick_theme(rng: &mut StdRng) -> usize {
    let draw: f64 = rng.random();
    let mut cumulative = 0.0;
    for (index, theme) in THEMES.iter().enumerate() {
        cumulative += theme.share;
        if draw < cumulative {
            return index;
        }
    }
    THEMES.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_reproducible() {
        let a = synthetic_catalog(50, 6, 42);
        let b = synthetic_catalog(50, 6, 42);
        assert_eq!(a.items, b.items);
        assert_eq!(a.embeddings, b.embeddings);
        assert_ne!(a.items, synthetic_catalog(50, 6, 43).items);
    }

    #[test]
    fn catalog_is_row_aligned_and_skewed() {
        let catalog = synthetic_catalog(400, 8, 7);
        assert_eq!(catalog.items.len(), 400);
        assert_eq!(catalog.themes.len(), 400);
        assert_eq!(catalog.embeddings.dim(), (400, 8));

        let dominant = catalog.themes.iter().filter(|&&t| t == 0).count();
        assert!(dominant > 150, "dominant theme has {dominant} items");
        assert!(
            catalog
                .items
                .iter()
                .all(|item| item.delay_years.is_none_or(|d| (0.0..=50.0).contains(&d)))
        );
    }
}
