//! Functional configuration options
//!
//! A [`ConfigOption`] is a named, fallible mutator for one configuration
//! object. [`apply_options`] runs a list of them in order against a fresh
//! target, stops at the first failure and finally runs the target's
//! [`Validate`] routine. The same engine builds driver client options and the
//! per-operation find/insert/update/delete options.
//!
//! # Examples
//!
//! ```ignore
//! use std::time::Duration;
//! use tournabyte_mongodb::options::{self, connect_opts_with};
//!
//! let config = connect_opts_with([
//!     options::app_name("reports"),
//!     options::hosts(["db1.internal:27017"]),
//!     options::direct_connection(true),
//!     options::connect_timeout(Duration::from_secs(2)),
//! ])?;
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bson::Document as BsonDocument;
use mongodb::options::{
    ClientOptions, Credential, DeleteOptions, FindOneOptions, FindOptions, Hint,
    InsertManyOptions, ReadConcern, ReadPreference, SelectionCriteria, ServerAddress, Tls,
    TlsOptions, UpdateOptions, WriteConcern,
};
use tracing::debug;

use crate::expr::{self, Filter, Node, Projection, SortKey};
use crate::{Result, StoreError};

/// Lowest heartbeat interval the driver accepts
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// A named, fallible mutator for a configuration object of type `T`
pub struct ConfigOption<T> {
    name: &'static str,
    apply: Box<dyn Fn(&mut T) -> Result<()> + Send + Sync>,
}

impl<T> ConfigOption<T> {
    pub fn new<F>(name: &'static str, apply: F) -> Self
    where
        F: Fn(&mut T) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name,
            apply: Box::new(apply),
        }
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Apply this option to `target`
    pub fn apply(&self, target: &mut T) -> Result<()> {
        (self.apply)(target)
    }
}

impl<T> fmt::Debug for ConfigOption<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOption")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Aggregate validation run once all options have been applied
pub trait Validate {
    /// Check the configuration as a whole.
    ///
    /// Errors should be `StoreError::ConfigValidation`.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Apply `options` to `target` in order, then validate the result.
///
/// The first failing option's error is returned unchanged and no later
/// option runs. A validation failure is always reported as
/// `StoreError::ConfigValidation`.
pub fn apply_options<T, I>(mut target: T, options: I) -> Result<T>
where
    T: Validate,
    I: IntoIterator<Item = ConfigOption<T>>,
{
    for option in options {
        if let Err(err) = option.apply(&mut target) {
            debug!(option = option.name(), error = %err, "Configuration option rejected");
            return Err(err);
        }
    }

    target.validate().map_err(|err| match err {
        StoreError::ConfigValidation(_) => err,
        other => StoreError::ConfigValidation(other.to_string()),
    })?;

    Ok(target)
}

pub type ConnectionOption = ConfigOption<ClientOptions>;
pub type FindOneOption = ConfigOption<FindOneOptions>;
pub type FindOption = ConfigOption<FindOptions>;
pub type InsertOption = ConfigOption<InsertManyOptions>;
pub type UpdateOption = ConfigOption<UpdateOptions>;
pub type DeleteOption = ConfigOption<DeleteOptions>;

/// Build validated driver client options
pub fn connect_opts_with(options: impl IntoIterator<Item = ConnectionOption>) -> Result<ClientOptions> {
    apply_options(ClientOptions::default(), options)
}

/// Build options for a single-result query
pub fn find_one_opts_with(options: impl IntoIterator<Item = FindOneOption>) -> Result<FindOneOptions> {
    apply_options(FindOneOptions::default(), options)
}

/// Build options for a multi-result query
pub fn find_opts_with(options: impl IntoIterator<Item = FindOption>) -> Result<FindOptions> {
    apply_options(FindOptions::default(), options)
}

/// Build options for a multi-document insert
pub fn insert_opts_with(options: impl IntoIterator<Item = InsertOption>) -> Result<InsertManyOptions> {
    apply_options(InsertManyOptions::default(), options)
}

/// Build options for an update
pub fn update_opts_with(options: impl IntoIterator<Item = UpdateOption>) -> Result<UpdateOptions> {
    apply_options(UpdateOptions::default(), options)
}

/// Build options for a delete
pub fn delete_opts_with(options: impl IntoIterator<Item = DeleteOption>) -> Result<DeleteOptions> {
    apply_options(DeleteOptions::default(), options)
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::ConfigValidation(message.into())
}

impl Validate for ClientOptions {
    fn validate(&self) -> Result<()> {
        if self.direct_connection == Some(true) && self.hosts.len() > 1 {
            return Err(invalid(
                "a direct connection cannot be made if multiple hosts are specified",
            ));
        }

        if self.max_pool_size == Some(0) {
            return Err(invalid("max pool size must be greater than zero"));
        }

        if let (Some(min), Some(max)) = (self.min_pool_size, self.max_pool_size) {
            if min > max {
                return Err(invalid(format!(
                    "min pool size ({}) exceeds max pool size ({})",
                    min, max
                )));
            }
        }

        if let Some(interval) = self.heartbeat_freq {
            if interval < MIN_HEARTBEAT_INTERVAL {
                return Err(invalid(format!(
                    "heartbeat interval must be at least {}ms, got {}ms",
                    MIN_HEARTBEAT_INTERVAL.as_millis(),
                    interval.as_millis()
                )));
            }
        }

        Ok(())
    }
}

impl Validate for FindOptions {
    fn validate(&self) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(invalid("batch size must be greater than zero"));
        }
        Ok(())
    }
}

impl Validate for FindOneOptions {}
impl Validate for InsertManyOptions {}
impl Validate for UpdateOptions {}
impl Validate for DeleteOptions {}

// ---------------------------------------------------------------------------
// Connection options
// ---------------------------------------------------------------------------

/// Application name reported to the server
pub fn app_name(name: impl Into<String>) -> ConnectionOption {
    let name = name.into();
    ConfigOption::new("app_name", move |opts: &mut ClientOptions| {
        opts.app_name = Some(name.clone());
        Ok(())
    })
}

/// Seed list of hosts. Each entry must parse as `host[:port]`.
pub fn hosts<S: Into<String>>(hosts: impl IntoIterator<Item = S>) -> ConnectionOption {
    let hosts: Vec<String> = hosts.into_iter().map(Into::into).collect();
    ConfigOption::new("hosts", move |opts: &mut ClientOptions| {
        if hosts.is_empty() {
            return Err(StoreError::OptionApplication(
                "at least one host is required".to_string(),
            ));
        }
        let parsed = hosts
            .iter()
            .map(|host| {
                ServerAddress::parse(host).map_err(|e| {
                    StoreError::OptionApplication(format!("invalid host '{}': {}", host, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        opts.hosts = parsed;
        Ok(())
    })
}

/// Connections the pool keeps open when idle
pub fn min_pool_size(size: u32) -> ConnectionOption {
    ConfigOption::new("min_pool_size", move |opts: &mut ClientOptions| {
        opts.min_pool_size = Some(size);
        Ok(())
    })
}

/// Upper bound on pooled connections. Must be greater than zero.
pub fn max_pool_size(size: u32) -> ConnectionOption {
    ConfigOption::new("max_pool_size", move |opts: &mut ClientOptions| {
        opts.max_pool_size = Some(size);
        Ok(())
    })
}

/// How long a pooled connection may stay idle before the driver closes it
pub fn max_idle_time(idle: Duration) -> ConnectionOption {
    ConfigOption::new("max_idle_time", move |opts: &mut ClientOptions| {
        opts.max_idle_time = Some(idle);
        Ok(())
    })
}

/// Username/password pair.
///
/// Both empty leaves authentication unset. Only one of the two being empty
/// is rejected.
pub fn credentials(username: impl Into<String>, password: impl Into<String>) -> ConnectionOption {
    let username = username.into();
    let password = password.into();
    ConfigOption::new("credentials", move |opts: &mut ClientOptions| {
        match (username.is_empty(), password.is_empty()) {
            (true, true) => Ok(()),
            (true, false) => Err(StoreError::OptionApplication(
                "password given without a username".to_string(),
            )),
            (false, true) => Err(StoreError::OptionApplication(format!(
                "username '{}' given without a password",
                username
            ))),
            (false, false) => {
                let mut credential = Credential::default();
                credential.username = Some(username.clone());
                credential.password = Some(password.clone());
                opts.credential = Some(credential);
                Ok(())
            }
        }
    })
}

/// Talk to the single given host instead of discovering the topology
pub fn direct_connection(direct: bool) -> ConnectionOption {
    ConfigOption::new("direct_connection", move |opts: &mut ClientOptions| {
        opts.direct_connection = Some(direct);
        Ok(())
    })
}

/// Socket connect timeout. Also bounds the health check run by `Connection::connect`.
pub fn connect_timeout(timeout: Duration) -> ConnectionOption {
    ConfigOption::new("connect_timeout", move |opts: &mut ClientOptions| {
        opts.connect_timeout = Some(timeout);
        Ok(())
    })
}

/// How long an operation waits for a suitable server
pub fn server_selection_timeout(timeout: Duration) -> ConnectionOption {
    ConfigOption::new("server_selection_timeout", move |opts: &mut ClientOptions| {
        opts.server_selection_timeout = Some(timeout);
        Ok(())
    })
}

/// Interval between server monitoring checks, at least 500ms
pub fn heartbeat_interval(interval: Duration) -> ConnectionOption {
    ConfigOption::new("heartbeat_interval", move |opts: &mut ClientOptions| {
        opts.heartbeat_freq = Some(interval);
        Ok(())
    })
}

/// Default read concern for operations
pub fn read_concern(concern: ReadConcern) -> ConnectionOption {
    ConfigOption::new("read_concern", move |opts: &mut ClientOptions| {
        opts.read_concern = Some(concern.clone());
        Ok(())
    })
}

/// Read preference, also used for the health check ping
pub fn read_preference(preference: ReadPreference) -> ConnectionOption {
    ConfigOption::new("read_preference", move |opts: &mut ClientOptions| {
        opts.selection_criteria = Some(SelectionCriteria::ReadPreference(preference.clone()));
        Ok(())
    })
}

/// Default write concern for operations
pub fn write_concern(concern: WriteConcern) -> ConnectionOption {
    ConfigOption::new("write_concern", move |opts: &mut ClientOptions| {
        opts.write_concern = Some(concern.clone());
        Ok(())
    })
}

/// Let the driver retry reads once on a retryable error
pub fn retry_reads(retry: bool) -> ConnectionOption {
    ConfigOption::new("retry_reads", move |opts: &mut ClientOptions| {
        opts.retry_reads = Some(retry);
        Ok(())
    })
}

/// Let the driver retry writes once on a retryable error
pub fn retry_writes(retry: bool) -> ConnectionOption {
    ConfigOption::new("retry_writes", move |opts: &mut ClientOptions| {
        opts.retry_writes = Some(retry);
        Ok(())
    })
}

fn with_tls(opts: &mut ClientOptions, configure: impl FnOnce(&mut TlsOptions)) {
    let mut tls = match opts.tls.take() {
        Some(Tls::Enabled(tls)) => tls,
        _ => TlsOptions::default(),
    };
    configure(&mut tls);
    opts.tls = Some(Tls::Enabled(tls));
}

/// Enable TLS, trusting the CA certificates in `path`
pub fn tls_ca_file(path: impl Into<PathBuf>) -> ConnectionOption {
    let path = path.into();
    ConfigOption::new("tls_ca_file", move |opts: &mut ClientOptions| {
        with_tls(opts, |tls| tls.ca_file_path = Some(path.clone()));
        Ok(())
    })
}

/// Enable TLS, presenting the PEM certificate and key in `path`
pub fn tls_client_certificate(path: impl Into<PathBuf>) -> ConnectionOption {
    let path = path.into();
    ConfigOption::new("tls_client_certificate", move |opts: &mut ClientOptions| {
        with_tls(opts, |tls| tls.cert_key_file_path = Some(path.clone()));
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Query options
// ---------------------------------------------------------------------------

/// Option targets shared by single- and multi-result queries
pub trait QueryOptionsTarget {
    fn set_projection(&mut self, projection: BsonDocument);
    fn set_sort(&mut self, sort: BsonDocument);
    fn set_skip(&mut self, skip: u64);
}

impl QueryOptionsTarget for FindOptions {
    fn set_projection(&mut self, projection: BsonDocument) {
        self.projection = Some(projection);
    }

    fn set_sort(&mut self, sort: BsonDocument) {
        self.sort = Some(sort);
    }

    fn set_skip(&mut self, skip: u64) {
        self.skip = Some(skip);
    }
}

impl QueryOptionsTarget for FindOneOptions {
    fn set_projection(&mut self, projection: BsonDocument) {
        self.projection = Some(projection);
    }

    fn set_sort(&mut self, sort: BsonDocument) {
        self.sort = Some(sort);
    }

    fn set_skip(&mut self, skip: u64) {
        self.skip = Some(skip);
    }
}

/// Merge `nodes` into a driver document. A field named twice is an option
/// error.
fn merged_document<N: Node>(nodes: &[N]) -> Result<BsonDocument> {
    expr::merge(nodes)
        .into_document()
        .map_err(|err| StoreError::OptionApplication(err.to_string()))
}

/// Fields to retain or discard in returned documents
pub fn projection<T: QueryOptionsTarget + 'static>(
    selectors: impl IntoIterator<Item = Projection>,
) -> ConfigOption<T> {
    let selectors: Vec<Projection> = selectors.into_iter().collect();
    ConfigOption::new("projection", move |opts: &mut T| {
        opts.set_projection(merged_document(&selectors)?);
        Ok(())
    })
}

/// Sort order, most significant key first
pub fn sort_by<T: QueryOptionsTarget + 'static>(keys: impl IntoIterator<Item = SortKey>) -> ConfigOption<T> {
    let keys: Vec<SortKey> = keys.into_iter().collect();
    ConfigOption::new("sort_by", move |opts: &mut T| {
        opts.set_sort(merged_document(&keys)?);
        Ok(())
    })
}

/// Number of matches to skip before returning results
pub fn skip_first<T: QueryOptionsTarget + 'static>(skip: u64) -> ConfigOption<T> {
    ConfigOption::new("skip_first", move |opts: &mut T| {
        opts.set_skip(skip);
        Ok(())
    })
}

/// Cap on the number of matches returned
pub fn limit_matches(limit: i64) -> FindOption {
    ConfigOption::new("limit_matches", move |opts: &mut FindOptions| {
        opts.limit = Some(limit);
        Ok(())
    })
}

/// Documents per cursor batch. Must be greater than zero.
pub fn batch_size(size: u32) -> FindOption {
    ConfigOption::new("batch_size", move |opts: &mut FindOptions| {
        opts.batch_size = Some(size);
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Mutation options
// ---------------------------------------------------------------------------

/// Run schema validation on inserted documents
pub fn validate_inserted_documents(validate: bool) -> InsertOption {
    ConfigOption::new("validate_inserted_documents", move |opts: &mut InsertManyOptions| {
        opts.bypass_document_validation = Some(!validate);
        Ok(())
    })
}

/// Stop inserting at the first failed document
pub fn stop_on_error(fail_fast: bool) -> InsertOption {
    ConfigOption::new("stop_on_error", move |opts: &mut InsertManyOptions| {
        opts.ordered = Some(fail_fast);
        Ok(())
    })
}

/// Run schema validation on updated documents
pub fn validate_updated_documents(validate: bool) -> UpdateOption {
    ConfigOption::new("validate_updated_documents", move |opts: &mut UpdateOptions| {
        opts.bypass_document_validation = Some(!validate);
        Ok(())
    })
}

/// Insert a new document when nothing matches the filter
pub fn upsert_on_no_match(upsert: bool) -> UpdateOption {
    ConfigOption::new("upsert_on_no_match", move |opts: &mut UpdateOptions| {
        opts.upsert = Some(upsert);
        Ok(())
    })
}

/// Filters selecting which array elements an update touches
pub fn array_element_filters(filters: impl IntoIterator<Item = Filter>) -> UpdateOption {
    let filters: Vec<Filter> = filters.into_iter().collect();
    ConfigOption::new("array_element_filters", move |opts: &mut UpdateOptions| {
        opts.array_filters = Some(filters.iter().map(Node::to_document).collect());
        Ok(())
    })
}

/// Index to use, given by its key pattern
pub fn hint_keys(keys: impl IntoIterator<Item = SortKey>) -> DeleteOption {
    let keys: Vec<SortKey> = keys.into_iter().collect();
    ConfigOption::new("hint_keys", move |opts: &mut DeleteOptions| {
        opts.hint = Some(Hint::Keys(merged_document(&keys)?));
        Ok(())
    })
}
