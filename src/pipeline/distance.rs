use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

/// Distance metric used to rank stored chunks against a query vector.
///
/// Lower distances mean more similar text for both metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos θ`, in `[0, 2]`.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
}

impl DistanceMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::L2 => "l2",
        }
    }

    /// Name of the SQL scalar function registered by [`register_functions`].
    pub fn sql_function(self) -> &'static str {
        match self {
            Self::Cosine => "cosine_distance",
            Self::L2 => "l2_distance",
        }
    }

    pub fn distance(self, a: &[f32], b: &[f32]) -> f64 {
        match self {
            Self::Cosine => cosine_distance(a, b),
            Self::L2 => l2_distance(a, b),
        }
    }
}

impl std::str::FromStr for DistanceMetric {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "l2" | "euclidean" => Ok(Self::L2),
            _ => Err(format!("invalid distance metric: {s}")),
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cosine distance. A zero-norm operand has no direction and scores 1.0.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

// ---------------------------------------------------------------------------
// Vector <-> BLOB
// ---------------------------------------------------------------------------

/// Encode a vector as little-endian `f32` bytes.
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes. Trailing partial values are ignored.
pub fn blob_to_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

// ---------------------------------------------------------------------------
// SQL functions
// ---------------------------------------------------------------------------

/// Register `cosine_distance(a, b)` and `l2_distance(a, b)` on `conn`.
///
/// Both take two embedding BLOBs of equal length and return a REAL.
pub fn register_functions(conn: &Connection) -> rusqlite::Result<()> {
    for metric in [DistanceMetric::Cosine, DistanceMetric::L2] {
        conn.create_scalar_function(
            metric.sql_function(),
            2,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            move |ctx| blob_distance(ctx, metric),
        )?;
    }
    Ok(())
}

fn blob_distance(ctx: &Context<'_>, metric: DistanceMetric) -> rusqlite::Result<f64> {
    let a = ctx
        .get_raw(0)
        .as_blob()
        .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
    let b = ctx
        .get_raw(1)
        .as_blob()
        .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
    if a.len() != b.len() {
        return Err(rusqlite::Error::UserFunctionError(
            format!("vector byte lengths differ: {} vs {}", a.len(), b.len()).into(),
        ));
    }
    Ok(metric.distance(&blob_to_vector(a), &blob_to_vector(b)))
}
