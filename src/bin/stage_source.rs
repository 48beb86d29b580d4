use std::path::PathBuf;

use credit_etl::{
    etl_config_from_env, init_logging, log_app_start, logging_config_from_env, open_database,
    stage_csv_dir, StagingConfig,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("stage_source", &logging);

    let cfg = etl_config_from_env();
    let csv_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("datasource"));

    let staging = StagingConfig {
        chunk_size: cfg.chunk_size,
        ..StagingConfig::default()
    };

    let mut conn = open_database(&cfg.source_db)?;
    let staged = stage_csv_dir(&mut conn, &csv_dir, &staging)?;

    for entry in &staged {
        if entry.skipped {
            println!("skipped {} (already has data)", entry.table);
        } else {
            println!("staged {} ({} rows)", entry.table, entry.rows);
        }
    }
    println!(
        "Staging complete | tables={} source_db={}",
        staged.len(),
        cfg.source_db.display()
    );

    Ok(())
}
