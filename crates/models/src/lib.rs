//! Shared serde types of the ingestion pipeline: declarative schemas,
//! document records, store records, and graph records.

mod documents;
mod entity;
mod graph;
mod register;
mod relationship;
mod store;

pub use documents::{CanonicalDocument, RawDocument};
pub use entity::{
    ChangeType, EntitySchema, IdentityKey, IdentityWhen, MergePolicy, PropertySchema,
};
pub use graph::{EntityInstance, NodeRecord, RelRecord};
pub use register::{
    Mapping, MatchPredicate, MatchRule, RegisterSchema, Scope, SchemaStatus, Source, Target,
    TransformSpec, Variant,
};
pub use relationship::{
    CreationRule, Direction, RelBind, RelGraphConfig, RelPropertyMap, RelRef, RelUniqueness,
    RelValueFrom, RelationshipSchema,
};
pub use store::{
    CanonicalContent, DocumentClassification, FailureCategory, FailureInfo, IngestedDocument,
    IngestionLog, IngestionRun, IngestionStatus, LogStatus, ParseStatus, QuarantineState,
    QuarantinedDocument, RawContent, RunMetrics, RunStatus, SchemaRef, WriteSummary,
};

fn default_version() -> u32 {
    1
}
