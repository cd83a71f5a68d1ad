pub mod config;
pub mod contracts;
pub mod db;
pub mod redis_bus;

pub use config::ServiceConfig;
pub use contracts::{
    BuddyDecideRequest, BuddyLinkView, BuddyRequestedEvent, BuddyVerificationResponse,
    CheckInRequest, CheckInResponse, CommitmentView, CreateCommitmentRequest,
    CreateCommitmentResponse, CreateStakeRequest, CreateStakeResponse, DonationBatchRequest,
    DonationBatchResponse, FeePreviewView, GatewayWebhookEvent, PaymentSucceededEvent,
    PendingDonationView, ProgressView, ScheduleInput, SettlementCompletedEvent, SettlementView,
    SplitView,
};
pub use db::connect_database;
pub use redis_bus::RedisBus;
