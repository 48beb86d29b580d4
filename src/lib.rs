//! Credit-risk feature ETL core crate.
//!
//! Pipeline shape: three raw relations (applications, previous applications,
//! installments) are extracted whole-table from the source database, folded
//! into one flat feature relation by the transform stage, and loaded
//! replace-contents into the target database. A CSV staging loader seeds the
//! source database from raw exports.

mod config;
mod extract;
mod frame;
mod load;
mod observability;
mod pipeline;
mod staging;
mod state;
mod transform;

pub use config::{etl_config_from_env, EtlConfig};
pub use extract::{
    extract_applications, extract_installments, extract_previous_applications, extract_table,
    ExtractError,
};
pub use frame::{ColumnSpec, ColumnType, Frame, FrameError, Value};
pub use load::{load_frame, open_database, LoadError};
pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use pipeline::{retry, run_pipeline, PipelineError, RunReport};
pub use staging::{
    slug_name, stage_csv_dir, stage_csv_file, StagedTable, StagingConfig, StagingError,
};
pub use state::{read_state, write_state, RunState, StateError};
pub use transform::{
    aggregate_installments, aggregate_previous, assert_schema_compatible, build_features,
    feature_schema, safe_div, safe_div_scalar, FeatureSchema, TransformError,
    FEATURE_COLUMN_ORDER, FEATURE_SCHEMA_VERSION,
};
