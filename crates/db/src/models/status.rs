//! Status helper enums mapping to SMALLSERIAL/SMALLINT lookup tables.
//!
//! Each enum variant's discriminant matches the seed data order (1-based)
//! in the corresponding `*_statuses` database table.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Generation job lifecycle status. `Done`, `Failed`, `Timeout` and
    /// `Cancelled` are terminal: no transition ever leaves them.
    JobStatus {
        Pending = 1,
        Processing = 2,
        Done = 3,
        Failed = 4,
        Timeout = 5,
        Cancelled = 6,
    }
}

define_status_enum! {
    /// Charge ledger status. Exactly one of `Committed` / `Refunded` is
    /// ever reached per charge key.
    ChargeStatus {
        Reserved = 1,
        Committed = 2,
        Refunded = 3,
    }
}

impl JobStatus {
    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }

    /// Decode a raw status id from a row. Unknown ids are a schema bug.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(JobStatus::Pending),
            2 => Some(JobStatus::Processing),
            3 => Some(JobStatus::Done),
            4 => Some(JobStatus::Failed),
            5 => Some(JobStatus::Timeout),
            6 => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Lookup-table name, used for user-facing text and /health JSON.
    pub fn name(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Timeout => "timeout",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(JobStatus::Pending.id(), 1);
        assert_eq!(JobStatus::Processing.id(), 2);
        assert_eq!(JobStatus::Done.id(), 3);
        assert_eq!(JobStatus::Failed.id(), 4);
        assert_eq!(JobStatus::Timeout.id(), 5);
        assert_eq!(JobStatus::Cancelled.id(), 6);
    }

    #[test]
    fn charge_status_ids_match_seed_data() {
        assert_eq!(ChargeStatus::Reserved.id(), 1);
        assert_eq!(ChargeStatus::Committed.id(), 2);
        assert_eq!(ChargeStatus::Refunded.id(), 3);
    }

    #[test]
    fn terminal_statuses_are_exactly_the_four_end_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn from_id_round_trips_every_variant() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Timeout,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(JobStatus::from_id(99), None);
    }
}
