use chrono::NaiveDate;
use credit_etl::{
    etl_config_from_env, init_logging, log_app_start, logging_config_from_env, run_pipeline,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging = logging_config_from_env();
    init_logging(&logging)?;
    log_app_start("run_etl", &logging);

    let mut cfg = etl_config_from_env();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--full" => cfg.full_refresh = true,
            "--dry-run" => cfg.dry_run = true,
            "--since" => {
                let raw = args.next().ok_or("--since requires a YYYY-MM-DD value")?;
                let date = NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|_| format!("invalid --since date: {raw}"))?;
                cfg.since_override = Some(date);
            }
            "--limit" => {
                let raw = args.next().ok_or("--limit requires a row count")?;
                let limit: u64 = raw
                    .parse()
                    .map_err(|_| format!("invalid --limit value: {raw}"))?;
                cfg.row_limit = Some(limit);
            }
            other => return Err(format!("unknown argument: {other}").into()),
        }
    }

    let report = run_pipeline(&cfg)?;

    println!(
        "ETL OK | applications={} previous_applications={} installments={} features={} loaded={} dry_run={}",
        report.applications,
        report.previous_applications,
        report.installments,
        report.feature_rows,
        report
            .loaded_rows
            .map(|rows| rows.to_string())
            .unwrap_or_else(|| "skipped".to_string()),
        report.dry_run
    );

    Ok(())
}
