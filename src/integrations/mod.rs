//! HTTP clients behind the orchestrator's collaborator seams.
//!
//! Each client is constructed once at startup from `AgentConfig` and shared
//! across conversation threads. The core never sees these types directly,
//! only the traits they implement.

pub mod backend;
pub mod crm;
pub mod messenger;
pub mod telegram;
pub mod tracker;
pub mod vector;

pub use backend::BackendGateway;
pub use crm::CrmClient;
pub use messenger::MessengerClient;
pub use telegram::TelegramNotifier;
pub use tracker::TrackerClient;
pub use vector::VectorSearchClient;
