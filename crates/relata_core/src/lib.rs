//! Unit-of-work engine for graphs of mapped business objects.
//! Transactions track every loaded or created object, keep bidirectional
//! relations consistent, load related data lazily and nest as
//! sub-transactions.

pub mod collection;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod mapping;
pub mod model;
pub mod relations;
pub mod repo;
pub mod store;
pub mod transaction;

pub use collection::{CollectionEventHandler, DomainObjectCollection};
pub use error::{CoreError, CoreResult, ErrorKind};
pub use events::{
    ListenerDecision, PropertyChange, RelationChange, RelationChangeKind, TransactionListener,
};
pub use logging::{default_log_level, init_logging, logging_status, LogArea, LoggingConfig};
pub use mapping::{
    ClassDefinition, MappingConfiguration, MappingError, PropertyDefinition,
    RelationPropertyDefinition,
};
pub use model::domain_object::DomainObject;
pub use model::object_id::{ObjectId, ObjectKey};
pub use model::property_values::{PropertyValues, Timestamp};
pub use model::state::ObjectState;
pub use model::value::{Value, ValueType};
pub use relations::{RelationEndPoint, RelationEndPointId};
pub use repo::{
    InMemoryPersistenceProvider, PersistenceProvider, ProviderError, SqlitePersistenceProvider,
};
pub use transaction::{current_transaction, ClientTransaction, ClientTransactionScope};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
