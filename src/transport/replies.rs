//! Per-transaction views over a successful [`ResponseMap`].

use crate::transport::client::TransportError;
use crate::transport::response::ResponseMap;

/// `uc`: identity the server settled on for this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationReply {
    pub guid: String,
    pub user_id: String,
    pub computer_name: Option<String>,
    pub user_name: Option<String>,
    pub options_counter: u64,
}

impl RegistrationReply {
    pub fn decode(fields: &ResponseMap) -> Result<Self, TransportError> {
        Ok(Self {
            guid: fields.require("g")?.to_owned(),
            user_id: fields.require("u")?.to_owned(),
            computer_name: fields.get("cn").map(str::to_owned),
            user_name: fields.get("un").map(str::to_owned),
            options_counter: fields.parse_required("od")?,
        })
    }
}

/// `po`: options the server wants the client to adopt. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramOptionsReply {
    pub work_preference: Option<u32>,
    pub worker_threads: Option<u32>,
    pub days_of_work: Option<f64>,
    pub memory_mib: Option<u64>,
    pub options_counter: Option<u64>,
}

impl ProgramOptionsReply {
    pub fn decode(fields: &ResponseMap) -> Result<Self, TransportError> {
        let day: Option<u64> = fields.parse_opt("DayMemory")?;
        let night: Option<u64> = fields.parse_opt("NightMemory")?;
        Ok(Self {
            work_preference: fields.parse_opt("w")?,
            worker_threads: fields.parse_opt("nw")?,
            days_of_work: fields.parse_opt("DaysOfWork")?,
            memory_mib: day.zip(night).map(|(d, n)| d.max(n)),
            options_counter: fields.parse_opt("od")?,
        })
    }
}

/// `ga`: one granted assignment, still in wire terms.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentGrant {
    pub work_type: u32,
    pub exponent: u64,
    pub key: String,
    pub k: Option<f64>,
    pub base: Option<u32>,
    pub c: Option<i64>,
    pub sieve_depth: Option<f64>,
    pub pminus1_done: Option<u8>,
    pub tests_saved: Option<f64>,
    pub prp_base: Option<u32>,
    pub residue_type: Option<u32>,
    pub known_factors: Option<String>,
    pub double_check: bool,
    pub squarings: Option<u64>,
}

impl AssignmentGrant {
    pub fn decode(fields: &ResponseMap) -> Result<Self, TransportError> {
        Ok(Self {
            work_type: fields.parse_required("w")?,
            exponent: fields.parse_required("n")?,
            key: fields.require("k")?.to_owned(),
            k: fields.parse_opt("A")?,
            base: fields.parse_opt("b")?,
            c: fields.parse_opt("c")?,
            sieve_depth: fields.parse_opt("sf")?,
            pminus1_done: fields.parse_opt("p1")?,
            tests_saved: fields.parse_opt("saved")?,
            prp_base: fields.parse_opt("base")?,
            residue_type: fields.parse_opt("rt")?,
            known_factors: fields.get("kf").map(str::to_owned),
            double_check: fields.contains("dc"),
            squarings: fields.parse_opt("ns")?,
        })
    }
}

/// `ra`: key issued for a locally created assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredKey {
    pub key: String,
}

impl RegisteredKey {
    pub fn decode(fields: &ResponseMap) -> Result<Self, TransportError> {
        Ok(Self {
            key: fields.require("k")?.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_requires_guid_and_counter() {
        let fields = ResponseMap::parse("g=abc\nu=user\ncn=box\nun=Name\nod=4\n");
        let reply = RegistrationReply::decode(&fields).expect("complete reply");
        assert_eq!(reply.guid, "abc");
        assert_eq!(reply.options_counter, 4);
        assert_eq!(reply.computer_name.as_deref(), Some("box"));

        let missing = ResponseMap::parse("u=user\nod=4\n");
        assert!(matches!(
            RegistrationReply::decode(&missing),
            Err(TransportError::MissingField { field: "g" })
        ));
    }

    #[test]
    fn program_options_take_larger_memory_setting() {
        let fields = ResponseMap::parse("w=150\nDayMemory=1024\nNightMemory=2048\n");
        let reply = ProgramOptionsReply::decode(&fields).expect("valid options");
        assert_eq!(reply.work_preference, Some(150));
        assert_eq!(reply.memory_mib, Some(2048));
        assert_eq!(reply.worker_threads, None);
    }

    #[test]
    fn prp_grant_decodes_optional_fields() {
        let fields = ResponseMap::parse(
            "w=150\nn=110000017\nk=0123456789ABCDEF0123456789ABCDEF\nA=1\nb=2\nc=-1\nsf=77\nsaved=1\nbase=3\nrt=1\ndc=\n",
        );
        let grant = AssignmentGrant::decode(&fields).expect("valid grant");
        assert_eq!(grant.work_type, 150);
        assert_eq!(grant.exponent, 110_000_017);
        assert_eq!(grant.prp_base, Some(3));
        assert!(grant.double_check);
        assert!(grant.known_factors.is_none());
    }

    #[test]
    fn grant_without_key_is_rejected() {
        let fields = ResponseMap::parse("w=100\nn=110000017\n");
        assert!(matches!(
            AssignmentGrant::decode(&fields),
            Err(TransportError::MissingField { field: "k" })
        ));
    }
}
