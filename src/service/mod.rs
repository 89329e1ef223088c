pub mod client;
pub mod encoding;
pub mod protocol;

pub use client::{RecognitionBackend, RecognitionClient};
pub use encoding::{default_encoders, FileReferenceEncoder, ImageEncoder, InlineBase64Encoder};
pub use protocol::{
    DeletionResult, EnrollmentProfile, EnrollmentResult, Recognition, RegistrationStatus, RiskProfile,
    ServiceHealth, ServiceInfo,
};
