pub mod content;
pub mod credential;

pub use content::SqlxContentRepository;
pub use credential::SqlxCredentialPersistence;
