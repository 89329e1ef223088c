pub mod authentication;
pub mod enrollment;
pub mod session;

pub use authentication::{AuthAction, AuthAttemptState, AuthState, AuthenticationWorkflow};
pub use enrollment::{EnrollmentState, EnrollmentWorkflow};
pub use session::{AuthMethod, SessionGrant};
