/// Error type for the edges of the harness, such as runtime creation, collaborator invocation and
/// persisting the run summary. Errors in the run itself have their own types in [crate::error].
pub type NetemLabResult<T> = anyhow::Result<T>;
