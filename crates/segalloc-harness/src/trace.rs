//! malloc-lab `.rep` trace files.
//!
//! A trace starts with four header numbers (suggested heap size, id count,
//! op count, weight) followed by one op per line:
//!
//! ```text
//! a <id> <size>
//! f <id>
//! r <id> <size>
//! ```
//!
//! Synthetic generators produce traces of the same shape so the harness and
//! benches share one workload format.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Trace parsing failure.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to read trace: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace header is missing `{field}`")]
    MissingHeader { field: &'static str },
    #[error("line {line}: `{value}` is not a valid {field}")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: unknown op `{op}`")]
    UnknownOp { line: usize, op: String },
    #[error("line {line}: missing {field}")]
    MissingOperand { line: usize, field: &'static str },
    #[error("line {line}: id {id} is outside the declared {num_ids} ids")]
    IdOutOfRange { line: usize, id: usize, num_ids: usize },
    #[error("header declares {num_ids} ids but only {num_ops} ops")]
    TooManyIds { num_ids: usize, num_ops: usize },
    #[error("header declares {declared} ops but trace has {found}")]
    OpCountMismatch { declared: usize, found: usize },
}

/// One trace operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum TraceOp {
    Alloc { id: usize, size: usize },
    Free { id: usize },
    Realloc { id: usize, size: usize },
}

impl TraceOp {
    #[must_use]
    pub const fn id(self) -> usize {
        match self {
            Self::Alloc { id, .. } | Self::Free { id } | Self::Realloc { id, .. } => id,
        }
    }
}

impl fmt::Display for TraceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Alloc { id, size } => write!(f, "a {id} {size}"),
            Self::Free { id } => write!(f, "f {id}"),
            Self::Realloc { id, size } => write!(f, "r {id} {size}"),
        }
    }
}

/// A parsed workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub suggested_heap: usize,
    pub num_ids: usize,
    pub weight: usize,
    pub ops: Vec<TraceOp>,
}

impl Trace {
    /// Builds a trace, deriving the id count and a heap hint from `ops`.
    #[must_use]
    pub fn from_ops(ops: Vec<TraceOp>) -> Self {
        let num_ids = ops.iter().map(|op| op.id() + 1).max().unwrap_or(0);
        let suggested_heap = ops
            .iter()
            .map(|op| match *op {
                TraceOp::Alloc { size, .. } | TraceOp::Realloc { size, .. } => size,
                TraceOp::Free { .. } => 0,
            })
            .sum();
        Self {
            suggested_heap,
            num_ids,
            weight: 1,
            ops,
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parses `.rep` text. Blank lines and `#` comments are ignored.
    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, raw)| (i + 1, raw.split('#').next().unwrap_or("").trim()))
            .filter(|(_, line)| !line.is_empty());

        let mut header = [0usize; 4];
        for (slot, field) in header
            .iter_mut()
            .zip(["suggested heap size", "id count", "op count", "weight"])
        {
            let (line, text) = lines.next().ok_or(TraceError::MissingHeader { field })?;
            *slot = parse_number(text, line, field)?;
        }
        let [suggested_heap, num_ids, num_ops, weight] = header;
        // Every id needs at least one op to become live.
        if num_ids > num_ops {
            return Err(TraceError::TooManyIds { num_ids, num_ops });
        }

        let mut ops = Vec::with_capacity(num_ops.min(1 << 16));
        for (line, text) in lines {
            let mut fields = text.split_whitespace();
            let op = fields.next().unwrap_or("");
            let id = next_number(&mut fields, line, "id")?;
            if id >= num_ids {
                return Err(TraceError::IdOutOfRange { line, id, num_ids });
            }
            let op = match op {
                "a" => TraceOp::Alloc {
                    id,
                    size: next_number(&mut fields, line, "size")?,
                },
                "f" => TraceOp::Free { id },
                "r" => TraceOp::Realloc {
                    id,
                    size: next_number(&mut fields, line, "size")?,
                },
                other => {
                    return Err(TraceError::UnknownOp {
                        line,
                        op: other.to_string(),
                    });
                }
            };
            ops.push(op);
        }
        if ops.len() != num_ops {
            return Err(TraceError::OpCountMismatch {
                declared: num_ops,
                found: ops.len(),
            });
        }
        Ok(Self {
            suggested_heap,
            num_ids,
            weight,
            ops,
        })
    }

    /// Renders the trace back to `.rep` text.
    #[must_use]
    pub fn to_rep(&self) -> String {
        self.to_string()
    }

    /// Lowercase hex SHA-256 of the canonical `.rep` rendering.
    #[must_use]
    pub fn sha256(&self) -> String {
        hex_lower(&Sha256::digest(self.to_rep().as_bytes()))
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.suggested_heap)?;
        writeln!(f, "{}", self.num_ids)?;
        writeln!(f, "{}", self.ops.len())?;
        writeln!(f, "{}", self.weight)?;
        for op in &self.ops {
            writeln!(f, "{op}")?;
        }
        Ok(())
    }
}

fn parse_number(text: &str, line: usize, field: &'static str) -> Result<usize, TraceError> {
    text.parse().map_err(|_| TraceError::InvalidNumber {
        line,
        field,
        value: text.to_string(),
    })
}

fn next_number<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    line: usize,
    field: &'static str,
) -> Result<usize, TraceError> {
    let text = fields
        .next()
        .ok_or(TraceError::MissingOperand { line, field })?;
    parse_number(text, line, field)
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Synthetic workload shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    /// Random alloc/free/realloc churn.
    Random,
    /// Alternating small/large blocks, smalls freed, then larger refills.
    Binary,
    /// One block grown repeatedly while small blockers are allocated.
    Realloc,
}

impl Pattern {
    pub const ALL: [Self; 3] = [Self::Random, Self::Binary, Self::Realloc];

    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" | "churn" => Some(Self::Random),
            "binary" | "binary-bal" => Some(Self::Binary),
            "realloc" | "realloc-bal" => Some(Self::Realloc),
            _ => None,
        }
    }

    /// Generates a trace with roughly `scale` ops.
    #[must_use]
    pub fn generate(self, seed: u64, scale: usize) -> Trace {
        match self {
            Self::Random => random_churn(seed, scale, 1024),
            Self::Binary => binary_pattern(scale / 3, 64, 448, 512),
            Self::Realloc => realloc_growth(scale / 3, 512, 128),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct XorShift64(u64);

impl XorShift64 {
    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

/// Random churn: allocates, frees and resizes ids with sizes in `1..=max_size`.
/// Every id still live at the end is freed.
#[must_use]
pub fn random_churn(seed: u64, ops: usize, max_size: usize) -> Trace {
    let max_size = max_size.max(1);
    let mut rng = XorShift64(seed | 1);
    let mut live: Vec<usize> = Vec::new();
    let mut next_id = 0;
    let mut out = Vec::with_capacity(ops * 2);
    for _ in 0..ops {
        let roll = rng.below(100);
        if roll < 50 || live.is_empty() {
            out.push(TraceOp::Alloc {
                id: next_id,
                size: rng.below(max_size) + 1,
            });
            live.push(next_id);
            next_id += 1;
        } else if roll < 85 {
            let id = live.swap_remove(rng.below(live.len()));
            out.push(TraceOp::Free { id });
        } else {
            let id = live[rng.below(live.len())];
            out.push(TraceOp::Realloc {
                id,
                size: rng.below(max_size) + 1,
            });
        }
    }
    live.sort_unstable();
    out.extend(live.into_iter().map(|id| TraceOp::Free { id }));
    Trace::from_ops(out)
}

/// `pairs` alternating small/large allocations; the small ones are then freed
/// and `refill`-byte requests are made that cannot reuse those holes.
#[must_use]
pub fn binary_pattern(pairs: usize, small: usize, large: usize, refill: usize) -> Trace {
    let mut ops = Vec::with_capacity(pairs * 5);
    for i in 0..pairs {
        ops.push(TraceOp::Alloc {
            id: 2 * i,
            size: small,
        });
        ops.push(TraceOp::Alloc {
            id: 2 * i + 1,
            size: large,
        });
    }
    ops.extend((0..pairs).map(|i| TraceOp::Free { id: 2 * i }));
    let base = 2 * pairs;
    ops.extend((0..pairs).map(|i| TraceOp::Alloc {
        id: base + i,
        size: refill,
    }));
    ops.extend((0..pairs).map(|i| TraceOp::Free { id: 2 * i + 1 }));
    ops.extend((0..pairs).map(|i| TraceOp::Free { id: base + i }));
    Trace::from_ops(ops)
}

/// Grows one block `steps` times by `step` bytes, allocating a small blocker
/// after each resize and freeing the previous one.
#[must_use]
pub fn realloc_growth(steps: usize, start: usize, step: usize) -> Trace {
    let mut ops = vec![TraceOp::Alloc { id: 0, size: start }];
    for i in 0..steps {
        let blocker = i + 1;
        ops.push(TraceOp::Realloc {
            id: 0,
            size: start + (i + 1) * step,
        });
        ops.push(TraceOp::Alloc {
            id: blocker,
            size: 128,
        });
        if blocker > 1 {
            ops.push(TraceOp::Free { id: blocker - 1 });
        }
    }
    if steps > 0 {
        ops.push(TraceOp::Free { id: steps });
    }
    ops.push(TraceOp::Free { id: 0 });
    Trace::from_ops(ops)
}
