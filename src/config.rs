//! TOML-based scenario configuration and preset definitions.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::time::TimeUnit;

/// Top-level scenario configuration parsed from TOML.
///
/// All fields have defaults matching the baseline scenario. Load from
/// TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Outdoor temperature curve parameters.
    #[serde(default)]
    pub outdoor: OutdoorConfig,
    /// Heater and room thermal parameters.
    #[serde(default)]
    pub heater: HeaterConfig,
    /// Solar panel parameters.
    #[serde(default)]
    pub solar: SolarConfig,
    /// Lamp parameters and user schedule.
    #[serde(default)]
    pub lamp: LampConfig,
    /// Electric meter parameters.
    #[serde(default)]
    pub meter: MeterConfig,
    /// Remote heater program, used by the distributed demo.
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Per-model run-parameter overrides, keyed by model URI.
    #[serde(default)]
    pub overrides: HashMap<String, HashMap<String, f64>>,
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Simulated time unit for the whole model tree.
    pub time_unit: TimeUnit,
    /// Run start instant, in `time_unit`.
    pub start: f64,
    /// Run end instant, in `time_unit` (must be > start).
    pub end: f64,
    /// Sampling step of the continuous models, in `time_unit`.
    pub step: f64,
    /// Master random seed.
    pub seed: u64,
    /// Pace the run against the wall clock.
    pub rt: bool,
    /// Simulated-to-wall-clock speedup for real-time runs (must be > 0).
    pub acceleration: f64,
    /// Split the run into household + controller components over the
    /// in-process plugin ports. Implies real-time pacing.
    pub distributed: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_unit: TimeUnit::Minutes,
            start: 0.0,
            end: 1440.0,
            step: 5.0,
            seed: 42,
            rt: false,
            acceleration: 60.0,
            distributed: false,
        }
    }
}

/// Outdoor temperature curve parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutdoorConfig {
    /// Daily mean temperature (°C).
    pub mean_c: f64,
    /// Half the daily swing (°C, >= 0).
    pub amplitude_c: f64,
}

impl Default for OutdoorConfig {
    fn default() -> Self {
        Self {
            mean_c: 8.0,
            amplitude_c: 6.0,
        }
    }
}

/// Heater and room thermal parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HeaterConfig {
    /// Electrical draw while heating (W, > 0).
    pub max_power_w: f64,
    /// Temperature gain at full power (°C per hour, > 0).
    pub heat_rate_c_per_hour: f64,
    /// Leakage toward outdoor temperature (per hour, > 0).
    pub loss_rate_per_hour: f64,
    /// Thermostat setpoint (°C).
    pub setpoint_c: f64,
    /// Thermostat dead band half-width (°C, > 0).
    pub hysteresis_c: f64,
    /// Room temperature at run start (°C).
    pub initial_room_c: f64,
}

impl Default for HeaterConfig {
    fn default() -> Self {
        Self {
            max_power_w: 2000.0,
            heat_rate_c_per_hour: 3.0,
            loss_rate_per_hour: 0.2,
            setpoint_c: 20.0,
            hysteresis_c: 0.5,
            initial_room_c: 16.0,
        }
    }
}

/// Solar panel parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolarConfig {
    /// Peak production (W, >= 0).
    pub peak_w: f64,
    /// Sunrise hour of day (inclusive).
    pub sunrise_hour: f64,
    /// Sunset hour of day (exclusive).
    pub sunset_hour: f64,
    /// Multiplicative noise standard deviation.
    pub noise_std: f64,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            peak_w: 4000.0,
            sunrise_hour: 7.0,
            sunset_hour: 19.0,
            noise_std: 0.05,
        }
    }
}

/// One scripted user or controller action.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionConfig {
    /// Offset from the run start, in the scenario time unit.
    pub at: f64,
    /// Command name.
    pub command: String,
}

/// Lamp parameters and user schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LampConfig {
    /// Draw in the low state (W, > 0).
    pub low_watts: f64,
    /// Draw in the high state (W, >= low_watts).
    pub high_watts: f64,
    /// User commands: `switch_on`, `switch_off`, `set_high`, `set_low`.
    pub schedule: Vec<ActionConfig>,
}

impl Default for LampConfig {
    fn default() -> Self {
        Self {
            low_watts: 20.0,
            high_watts: 60.0,
            // Evening usage: on at 18:00, bright at 19:00, off at 23:00.
            schedule: vec![
                ActionConfig {
                    at: 1080.0,
                    command: "switch_on".into(),
                },
                ActionConfig {
                    at: 1140.0,
                    command: "set_high".into(),
                },
                ActionConfig {
                    at: 1380.0,
                    command: "switch_off".into(),
                },
            ],
        }
    }
}

/// Electric meter parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeterConfig {
    /// Always-on household draw (W, >= 0).
    pub base_load_w: f64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self { base_load_w: 120.0 }
    }
}

/// Remote heater program for the distributed demo.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Commands: `heat`, `do_not_heat`. Empty means the household thermostat
    /// runs unattended.
    pub program: Vec<ActionConfig>,
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.step"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {} — {}", self.field, self.message)
    }
}

const LAMP_COMMANDS: &[&str] = &["switch_on", "switch_off", "set_high", "set_low"];
const CONTROLLER_COMMANDS: &[&str] = &["heat", "do_not_heat"];

impl ScenarioConfig {
    /// Returns the baseline scenario: one simulated day, as-fast-as-possible.
    pub fn baseline() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            outdoor: OutdoorConfig::default(),
            heater: HeaterConfig::default(),
            solar: SolarConfig::default(),
            lamp: LampConfig::default(),
            meter: MeterConfig::default(),
            controller: ControllerConfig::default(),
            overrides: HashMap::new(),
        }
    }

    /// Returns the real-time demo preset: two simulated hours paced at 120x,
    /// so the run takes about a wall-clock minute.
    pub fn rt_demo() -> Self {
        Self {
            simulation: SimulationConfig {
                end: 120.0,
                rt: true,
                acceleration: 120.0,
                ..SimulationConfig::default()
            },
            lamp: LampConfig {
                schedule: vec![
                    ActionConfig {
                        at: 10.0,
                        command: "switch_on".into(),
                    },
                    ActionConfig {
                        at: 60.0,
                        command: "set_high".into(),
                    },
                    ActionConfig {
                        at: 110.0,
                        command: "switch_off".into(),
                    },
                ],
                ..LampConfig::default()
            },
            ..Self::baseline()
        }
    }

    /// Returns the distributed demo preset: household and a remote heater
    /// controller as two plugin components sharing a start barrier.
    pub fn distributed() -> Self {
        Self {
            simulation: SimulationConfig {
                end: 120.0,
                rt: true,
                acceleration: 240.0,
                distributed: true,
                ..SimulationConfig::default()
            },
            controller: ControllerConfig {
                program: vec![
                    ActionConfig {
                        at: 30.0,
                        command: "do_not_heat".into(),
                    },
                    ActionConfig {
                        at: 90.0,
                        command: "heat".into(),
                    },
                ],
            },
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "rt_demo", "distributed"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "rt_demo" => Ok(Self::rt_demo()),
            "distributed" => Ok(Self::distributed()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "scenario".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let s = &self.simulation;

        if s.start < 0.0 {
            errors.push(ConfigError {
                field: "simulation.start".into(),
                message: "must be >= 0".into(),
            });
        }
        if !(s.end > s.start) {
            errors.push(ConfigError {
                field: "simulation.end".into(),
                message: "must be > simulation.start".into(),
            });
        }
        if !(s.step > 0.0) {
            errors.push(ConfigError {
                field: "simulation.step".into(),
                message: "must be > 0".into(),
            });
        }
        if !(s.acceleration > 0.0) || !s.acceleration.is_finite() {
            errors.push(ConfigError {
                field: "simulation.acceleration".into(),
                message: "must be finite and > 0".into(),
            });
        }
        if s.distributed && !s.rt {
            errors.push(ConfigError {
                field: "simulation.rt".into(),
                message: "distributed runs are paced; set rt = true".into(),
            });
        }

        if self.outdoor.amplitude_c < 0.0 {
            errors.push(ConfigError {
                field: "outdoor.amplitude_c".into(),
                message: "must be >= 0".into(),
            });
        }

        let h = &self.heater;
        if h.max_power_w <= 0.0 || h.heat_rate_c_per_hour <= 0.0 || h.loss_rate_per_hour <= 0.0 {
            errors.push(ConfigError {
                field: "heater".into(),
                message: "max_power_w, heat_rate_c_per_hour and loss_rate_per_hour must be > 0"
                    .into(),
            });
        }
        if h.hysteresis_c <= 0.0 {
            errors.push(ConfigError {
                field: "heater.hysteresis_c".into(),
                message: "must be > 0".into(),
            });
        }

        let sol = &self.solar;
        if sol.peak_w < 0.0 {
            errors.push(ConfigError {
                field: "solar.peak_w".into(),
                message: "must be >= 0".into(),
            });
        }
        if !(0.0 <= sol.sunrise_hour && sol.sunrise_hour < sol.sunset_hour && sol.sunset_hour <= 24.0)
        {
            errors.push(ConfigError {
                field: "solar.sunrise_hour".into(),
                message: "daylight window must satisfy 0 <= sunrise < sunset <= 24".into(),
            });
        }

        let lamp = &self.lamp;
        if !(0.0 < lamp.low_watts && lamp.low_watts <= lamp.high_watts) {
            errors.push(ConfigError {
                field: "lamp.low_watts".into(),
                message: "must satisfy 0 < low_watts <= high_watts".into(),
            });
        }
        errors.extend(validate_schedule(
            "lamp.schedule",
            &lamp.schedule,
            LAMP_COMMANDS,
            s.end - s.start,
        ));

        if self.meter.base_load_w < 0.0 {
            errors.push(ConfigError {
                field: "meter.base_load_w".into(),
                message: "must be >= 0".into(),
            });
        }

        errors.extend(validate_schedule(
            "controller.program",
            &self.controller.program,
            CONTROLLER_COMMANDS,
            s.end - s.start,
        ));

        errors
    }
}

fn validate_schedule(
    field: &str,
    actions: &[ActionConfig],
    commands: &[&str],
    run_length: f64,
) -> Vec<ConfigError> {
    let mut errors = Vec::new();
    for window in actions.windows(2) {
        if window[0].at > window[1].at {
            errors.push(ConfigError {
                field: field.into(),
                message: "offsets must be ascending".into(),
            });
            break;
        }
    }
    for action in actions {
        if action.at < 0.0 || action.at > run_length {
            errors.push(ConfigError {
                field: format!("{field}.at"),
                message: format!("offset {} lies outside the run", action.at),
            });
        }
        if !commands.contains(&action.command.as_str()) {
            errors.push(ConfigError {
                field: format!("{field}.command"),
                message: format!(
                    "unknown command \"{}\", available: {}",
                    action.command,
                    commands.join(", ")
                ),
            });
        }
    }
    errors
}
