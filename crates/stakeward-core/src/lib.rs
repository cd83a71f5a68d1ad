pub mod error;
pub mod models;
pub mod storage;

pub use error::EngineError;
pub use models::{
    BuddyVerification, CheckIn, Commitment, CommitmentKind, CommitmentStatus, Outcome, Payment,
    PaymentStatus, PricingModel, Schedule, VerificationMode, VerificationStatus,
};
pub use storage::{
    AdminStore, BuddyVerificationStore, CheckInStore, CommitmentStore, PaymentStore, Store,
};
