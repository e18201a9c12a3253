use serde::{Serialize, Serializer};

pub const PASSING_THRESHOLD: f64 = 3.0;
pub const ENGLISH_PASSING_THRESHOLD: f64 = 3.5;

/// Performance band printed next to each boletín row.
///
/// `Unknown` is the blank cell: no score, or a score outside every band
/// (the bands leave gaps such as 4.41..4.49). It is not the same as `Bajo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceTier {
    Superior,
    Alto,
    Basico,
    Bajo,
    Unknown,
}

impl PerformanceTier {
    pub fn as_str(self) -> &'static str {
        match self {
            PerformanceTier::Superior => "SUPERIOR",
            PerformanceTier::Alto => "ALTO",
            PerformanceTier::Basico => "BÁSICO",
            PerformanceTier::Bajo => "BAJO",
            PerformanceTier::Unknown => "",
        }
    }
}

impl Serialize for PerformanceTier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

pub fn tier(score: Option<f64>) -> PerformanceTier {
    let Some(s) = score else {
        return PerformanceTier::Unknown;
    };
    if (4.5..=5.0).contains(&s) {
        PerformanceTier::Superior
    } else if (4.0..=4.4).contains(&s) {
        PerformanceTier::Alto
    } else if (3.5..=3.9).contains(&s) {
        PerformanceTier::Basico
    } else if (1.0..=3.4).contains(&s) {
        PerformanceTier::Bajo
    } else {
        PerformanceTier::Unknown
    }
}

/// Uppercase and drop Spanish diacritics so "Inglés" and "INGLES" compare equal.
pub fn fold_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'Á' | 'À' | 'Ä' => 'A',
            'é' | 'è' | 'ë' | 'É' | 'È' | 'Ë' => 'E',
            'í' | 'ì' | 'ï' | 'Í' | 'Ì' | 'Ï' => 'I',
            'ó' | 'ò' | 'ö' | 'Ó' | 'Ò' | 'Ö' => 'O',
            'ú' | 'ù' | 'ü' | 'Ú' | 'Ù' | 'Ü' => 'U',
            'ñ' | 'Ñ' => 'N',
            other => other.to_ascii_uppercase(),
        })
        .collect()
}

pub fn is_english(name: &str) -> bool {
    let folded = fold_name(name);
    folded.contains("INGLES") || folded.contains("ENGLISH")
}

pub fn passing_threshold(name: &str) -> f64 {
    if is_english(name) {
        ENGLISH_PASSING_THRESHOLD
    } else {
        PASSING_THRESHOLD
    }
}

/// A missing score is never failing.
pub fn is_failing(name: &str, score: Option<f64>) -> bool {
    match score {
        Some(s) => s < passing_threshold(name),
        None => false,
    }
}
