// Constants shared across the muster crates.

/// The default configuration file name for the application.
/// This constant is used to specify the default configuration file
/// that the application will attempt to load at startup.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "muster.toml";

/// Directory the results log is resolved under when the configured
/// file name is not an explicit path.
pub const DATA_DIR: &str = "./data";

/// Directory rolling log files are written to.
pub const LOG_DIR: &str = "logs";

/// Topic suffix sensors publish readings on (`<sensor_id>/<suffix>`).
pub const READING_TOPIC_SUFFIX: &str = "output";

/// Topic suffix sensors receive commands on (`<sensor_id>/<suffix>`).
pub const COMMAND_TOPIC_SUFFIX: &str = "input";

/// Column value written for a device that never produced a reading in a cycle.
pub const ABSENT_VALUE: &str = "NaN";
