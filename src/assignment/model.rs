//! Immutable assignment record.
//!
//! Values are only ever created through [`AssignmentBuilder`], which checks
//! the invariants every queued entry must satisfy, and changed through the
//! `with_*` copy constructors.

use crate::assignment::codec::ParseError;
use crate::assignment::primes::is_prime;

pub const DEFAULT_SIEVE_DEPTH: f64 = 99.0;
pub const MIN_PMINUS1_B1: u64 = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkType {
    FirstLl,
    DoubleCheckLl,
    Prp,
    PMinus1,
    PFactor,
    Cert,
}

impl WorkType {
    /// PrimeNet work type code.
    pub fn code(self) -> u32 {
        match self {
            Self::FirstLl => 100,
            Self::DoubleCheckLl => 101,
            Self::Prp => 150,
            Self::PMinus1 => 3,
            Self::PFactor => 4,
            Self::Cert => 200,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            100 => Some(Self::FirstLl),
            101 => Some(Self::DoubleCheckLl),
            150 => Some(Self::Prp),
            3 => Some(Self::PMinus1),
            4 => Some(Self::PFactor),
            200 => Some(Self::Cert),
            _ => None,
        }
    }

    pub fn is_lucas_lehmer(self) -> bool {
        matches!(self, Self::FirstLl | Self::DoubleCheckLl)
    }

    /// LL or PRP: work that ends in a primality verdict.
    pub fn is_primality_test(self) -> bool {
        matches!(self, Self::FirstLl | Self::DoubleCheckLl | Self::Prp)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FirstLl => "LL",
            Self::DoubleCheckLl => "Double check",
            Self::Prp => "PRP",
            Self::PMinus1 | Self::PFactor => "P-1",
            Self::Cert => "CERT",
        }
    }
}

/// One unit of work for the candidate `k·base^exponent + c`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    work_type: WorkType,
    id: Option<String>,
    k: f64,
    base: u32,
    exponent: u64,
    c: i64,
    sieve_depth: f64,
    pminus1_done: bool,
    b1: u64,
    b2: u64,
    tests_saved: f64,
    prp_base: u32,
    residue_type: u32,
    known_factors: Option<String>,
    prp_double_check: bool,
    cert_squarings: u64,
}

impl Assignment {
    pub fn builder(work_type: WorkType, exponent: u64) -> AssignmentBuilder {
        AssignmentBuilder::new(work_type, exponent)
    }

    pub fn work_type(&self) -> WorkType {
        self.work_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn k(&self) -> f64 {
        self.k
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn exponent(&self) -> u64 {
        self.exponent
    }

    pub fn c(&self) -> i64 {
        self.c
    }

    pub fn sieve_depth(&self) -> f64 {
        self.sieve_depth
    }

    pub fn pminus1_done(&self) -> bool {
        self.pminus1_done
    }

    pub fn b1(&self) -> u64 {
        self.b1
    }

    pub fn b2(&self) -> u64 {
        self.b2
    }

    pub fn tests_saved(&self) -> f64 {
        self.tests_saved
    }

    pub fn prp_base(&self) -> u32 {
        self.prp_base
    }

    pub fn residue_type(&self) -> u32 {
        self.residue_type
    }

    pub fn known_factors(&self) -> Option<&str> {
        self.known_factors.as_deref()
    }

    pub fn is_prp_double_check(&self) -> bool {
        self.prp_double_check
    }

    pub fn cert_squarings(&self) -> u64 {
        self.cert_squarings
    }

    /// True for a plain Mersenne candidate `2^p - 1`.
    pub fn is_mersenne(&self) -> bool {
        self.k == 1.0 && self.base == 2 && self.c == -1
    }

    pub fn with_work_type(&self, work_type: WorkType) -> Self {
        Self {
            work_type,
            ..self.clone()
        }
    }

    pub fn with_pminus1_done(&self, pminus1_done: bool) -> Self {
        Self {
            pminus1_done,
            ..self.clone()
        }
    }

    pub fn with_tests_saved(&self, tests_saved: f64) -> Self {
        Self {
            tests_saved,
            ..self.clone()
        }
    }

    pub fn with_bounds(&self, b1: u64, b2: u64) -> Self {
        Self {
            b1,
            b2,
            ..self.clone()
        }
    }

    pub fn with_id(&self, id: Option<String>) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssignmentBuilder {
    inner: Assignment,
}

impl AssignmentBuilder {
    pub fn new(work_type: WorkType, exponent: u64) -> Self {
        Self {
            inner: Assignment {
                work_type,
                id: None,
                k: 1.0,
                base: 2,
                exponent,
                c: -1,
                sieve_depth: DEFAULT_SIEVE_DEPTH,
                pminus1_done: true,
                b1: 0,
                b2: 0,
                tests_saved: 0.0,
                prp_base: 0,
                residue_type: 0,
                known_factors: None,
                prp_double_check: false,
                cert_squarings: 0,
            },
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.inner.id = (!id.is_empty()).then_some(id);
        self
    }

    pub fn candidate(mut self, k: f64, base: u32, c: i64) -> Self {
        self.inner.k = k;
        self.inner.base = base;
        self.inner.c = c;
        self
    }

    pub fn sieve_depth(mut self, sieve_depth: f64) -> Self {
        self.inner.sieve_depth = sieve_depth;
        self
    }

    pub fn pminus1_done(mut self, done: bool) -> Self {
        self.inner.pminus1_done = done;
        self
    }

    pub fn bounds(mut self, b1: u64, b2: u64) -> Self {
        self.inner.b1 = b1;
        self.inner.b2 = b2;
        self
    }

    pub fn tests_saved(mut self, tests_saved: f64) -> Self {
        self.inner.tests_saved = tests_saved;
        self
    }

    pub fn prp_options(mut self, prp_base: u32, residue_type: u32) -> Self {
        self.inner.prp_base = prp_base;
        self.inner.residue_type = residue_type;
        self
    }

    pub fn known_factors(mut self, factors: Option<String>) -> Self {
        self.inner.known_factors = factors.filter(|f| !f.is_empty());
        self
    }

    pub fn prp_double_check(mut self, double_check: bool) -> Self {
        self.inner.prp_double_check = double_check;
        self
    }

    pub fn cert_squarings(mut self, squarings: u64) -> Self {
        self.inner.cert_squarings = squarings;
        self
    }

    pub fn build(self) -> Result<Assignment, ParseError> {
        let assignment = self.inner;
        if assignment.is_mersenne()
            && assignment.work_type != WorkType::PMinus1
            && !is_prime(assignment.exponent)
        {
            return Err(ParseError::CompositeExponent {
                exponent: assignment.exponent,
            });
        }
        if assignment.work_type == WorkType::PMinus1 && assignment.b1 < MIN_PMINUS1_B1 {
            return Err(ParseError::BoundTooSmall {
                exponent: assignment.exponent,
                b1: assignment.b1,
            });
        }
        if assignment.b2 != 0 && assignment.b2 < assignment.b1 {
            return Err(ParseError::BoundsInverted {
                b1: assignment.b1,
                b2: assignment.b2,
            });
        }
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_type_codes_round_trip() {
        for work_type in [
            WorkType::FirstLl,
            WorkType::DoubleCheckLl,
            WorkType::Prp,
            WorkType::PMinus1,
            WorkType::PFactor,
            WorkType::Cert,
        ] {
            assert_eq!(WorkType::from_code(work_type.code()), Some(work_type));
        }
        assert_eq!(WorkType::from_code(2), None);
    }

    #[test]
    fn builder_applies_defaults() {
        let assignment = Assignment::builder(WorkType::Prp, 9941)
            .build()
            .expect("prime exponent");
        assert_eq!(assignment.sieve_depth(), DEFAULT_SIEVE_DEPTH);
        assert!(assignment.pminus1_done());
        assert!(assignment.is_mersenne());
        assert_eq!(assignment.id(), None);
    }

    #[test]
    fn composite_mersenne_exponent_is_rejected() {
        let err = Assignment::builder(WorkType::FirstLl, 9943)
            .build()
            .expect_err("9943 = 61 * 163");
        assert!(matches!(err, ParseError::CompositeExponent { exponent: 9943 }));
    }

    #[test]
    fn composite_exponent_allowed_for_other_forms_and_pminus1() {
        Assignment::builder(WorkType::Prp, 9943)
            .candidate(3.0, 2, 1)
            .build()
            .expect("not a Mersenne candidate");
        Assignment::builder(WorkType::PMinus1, 9943)
            .bounds(50_000, 100_000)
            .build()
            .expect("P-1 on composite exponent is allowed");
    }

    #[test]
    fn pminus1_bounds_are_checked() {
        let err = Assignment::builder(WorkType::PMinus1, 9941)
            .bounds(49_999, 0)
            .build()
            .expect_err("B1 too small");
        assert!(matches!(err, ParseError::BoundTooSmall { b1: 49_999, .. }));

        let err = Assignment::builder(WorkType::PMinus1, 9941)
            .bounds(100_000, 60_000)
            .build()
            .expect_err("B2 below B1");
        assert!(matches!(err, ParseError::BoundsInverted { .. }));
    }

    #[test]
    fn with_methods_copy_instead_of_mutating() {
        let original = Assignment::builder(WorkType::Prp, 9941)
            .build()
            .expect("valid");
        let rewritten = original
            .with_work_type(WorkType::FirstLl)
            .with_pminus1_done(false);
        assert_eq!(original.work_type(), WorkType::Prp);
        assert!(original.pminus1_done());
        assert_eq!(rewritten.work_type(), WorkType::FirstLl);
        assert!(!rewritten.pminus1_done());
    }
}
