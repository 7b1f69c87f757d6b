//! Repositories over the database pool.

pub mod conversation_repo;
pub mod document_repo;
pub mod run_repo;
pub mod workflow_version_repo;

pub use conversation_repo::ConversationRepository;
pub use document_repo::{DocumentRepository, PgDocumentStatusStore};
pub use run_repo::RunRepository;
pub use workflow_version_repo::WorkflowVersionRepository;
