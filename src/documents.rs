//! Document kinds tracked by the desk and the money fields they share.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Every validity-bearing document type.
///
/// Each kind lives in its own table and carries its own lookahead window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Insurance,
    Puc,
    TemporaryPermit,
    Tax,
    Fitness,
    NationalPermit,
    CgPermit,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 7] = [
        DocumentKind::Insurance,
        DocumentKind::Puc,
        DocumentKind::TemporaryPermit,
        DocumentKind::Tax,
        DocumentKind::Fitness,
        DocumentKind::NationalPermit,
        DocumentKind::CgPermit,
    ];

    /// Table holding records of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            DocumentKind::Insurance => "insurance",
            DocumentKind::Puc => "puc",
            DocumentKind::TemporaryPermit => "temporary_permits",
            DocumentKind::Tax => "tax",
            DocumentKind::Fitness => "fitness",
            DocumentKind::NationalPermit => "national_permits",
            DocumentKind::CgPermit => "cg_permits",
        }
    }

    /// URL path segment.
    pub fn slug(&self) -> &'static str {
        match self {
            DocumentKind::Insurance => "insurance",
            DocumentKind::Puc => "puc",
            DocumentKind::TemporaryPermit => "temporary-permits",
            DocumentKind::Tax => "tax",
            DocumentKind::Fitness => "fitness",
            DocumentKind::NationalPermit => "national-permits",
            DocumentKind::CgPermit => "cg-permits",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        DocumentKind::ALL.into_iter().find(|k| k.slug() == slug)
    }

    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Insurance => "insurance record",
            DocumentKind::Puc => "PUC certificate",
            DocumentKind::TemporaryPermit => "temporary permit",
            DocumentKind::Tax => "tax record",
            DocumentKind::Fitness => "fitness certificate",
            DocumentKind::NationalPermit => "national permit",
            DocumentKind::CgPermit => "CG permit",
        }
    }

    /// Days before `valid_to` at which a record starts counting as expiring.
    pub fn default_window_days(&self) -> u32 {
        match self {
            DocumentKind::Puc | DocumentKind::TemporaryPermit | DocumentKind::Tax => 15,
            DocumentKind::Insurance
            | DocumentKind::Fitness
            | DocumentKind::NationalPermit
            | DocumentKind::CgPermit => 30,
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Fee and payment amounts in whole rupees.
///
/// The outstanding balance is always derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fees {
    pub total: i64,
    pub paid: i64,
}

impl Fees {
    pub fn new(total: i64, paid: i64) -> Self {
        Self { total, paid }
    }

    pub fn balance(&self) -> i64 {
        self.total - self.paid
    }

    /// Returns every violated constraint as `(field, message)`.
    pub fn problems(&self) -> Vec<(&'static str, &'static str)> {
        let mut problems = Vec::new();
        if self.total < 0 {
            problems.push(("total_fee", "must not be negative"));
        }
        if self.paid < 0 {
            problems.push(("paid", "must not be negative"));
        }
        if self.paid > self.total {
            problems.push(("paid", "must not exceed total_fee"));
        }
        problems
    }
}

/// Normalize a vehicle registration number: trim, drop inner whitespace,
/// uppercase.
pub fn normalize_vehicle_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}
