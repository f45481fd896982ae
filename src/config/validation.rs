use crate::config::types::{
    CheckerConfig, Config, ConsumerConfig, RecheckConfig, RobotsConfig, SchedulerConfig,
    StorageConfig,
};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_scheduler_config(&config.scheduler)?;
    validate_recheck_config(&config.recheck)?;
    validate_checker_config(&config.checker)?;
    validate_robots_config(&config.robots)?;
    validate_storage_config(&config.storage)?;
    validate_consumer_config(&config.consumer)?;
    Ok(())
}

fn validate_scheduler_config(config: &SchedulerConfig) -> Result<(), ConfigError> {
    validate_cron(&config.feed_refresh_cron)?;
    validate_cron(&config.article_recheck_cron)?;

    if config.batch_size < 1 {
        return Err(ConfigError::Validation(format!(
            "batch_size must be >= 1, got {}",
            config.batch_size
        )));
    }

    if config.max_concurrent_batches < 1 || config.max_concurrent_batches > 64 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_batches must be between 1 and 64, got {}",
            config.max_concurrent_batches
        )));
    }

    Ok(())
}

fn validate_recheck_config(config: &RecheckConfig) -> Result<(), ConfigError> {
    if config.window_hours < 1 {
        return Err(ConfigError::Validation(format!(
            "window_hours must be >= 1, got {}",
            config.window_hours
        )));
    }

    if config.min_gap_minutes < 0 {
        return Err(ConfigError::Validation(format!(
            "min_gap_minutes cannot be negative, got {}",
            config.min_gap_minutes
        )));
    }

    // Oversized pages are clamped at use, not rejected here
    Ok(())
}

fn validate_checker_config(config: &CheckerConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user_agent cannot be empty".to_string(),
        ));
    }

    if config.max_attempts < 1 || config.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be between 1 and 10, got {}",
            config.max_attempts
        )));
    }

    if config.backoff_max_ms < config.backoff_initial_ms {
        return Err(ConfigError::Validation(format!(
            "backoff_max_ms ({}) must be >= backoff_initial_ms ({})",
            config.backoff_max_ms, config.backoff_initial_ms
        )));
    }

    if config.max_content_bytes < 1024 {
        return Err(ConfigError::Validation(format!(
            "max_content_bytes must be >= 1024, got {}",
            config.max_content_bytes
        )));
    }

    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "timeout_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_robots_config(config: &RobotsConfig) -> Result<(), ConfigError> {
    if config.cache_ttl_hours < 1 {
        return Err(ConfigError::Validation(format!(
            "cache_ttl_hours must be >= 1, got {}",
            config.cache_ttl_hours
        )));
    }

    if config.max_bytes < 512 {
        return Err(ConfigError::Validation(format!(
            "robots max_bytes must be >= 512, got {}",
            config.max_bytes
        )));
    }

    if let Some(agent) = &config.agent {
        if agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "robots agent cannot be blank when set".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_consumer_config(config: &ConsumerConfig) -> Result<(), ConfigError> {
    if config.workers < 1 {
        return Err(ConfigError::Validation(
            "consumer workers must be >= 1".to_string(),
        ));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue_capacity must be >= 1".to_string(),
        ));
    }

    if config.max_deliveries < 1 {
        return Err(ConfigError::Validation(
            "max_deliveries must be >= 1".to_string(),
        ));
    }

    Ok(())
}

/// Checks the shape of a cron expression
///
/// The scheduler uses second-resolution cron: 6 fields, or 7 with a year.
/// Field contents are parsed when the job is registered.
fn validate_cron(expression: &str) -> Result<(), ConfigError> {
    let fields = expression.split_whitespace().count();
    if fields == 6 || fields == 7 {
        return Ok(());
    }

    Err(ConfigError::InvalidCron {
        expression: expression.to_string(),
        message: format!("expected 6 or 7 fields (seconds first), got {}", fields),
    })
}
