pub mod error;
pub mod orchestration;
pub mod platforms;
