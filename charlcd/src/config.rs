use charlcd_gpio::PORT_WIDTH;
use charlcd_gpio::lcd::hd44780::driver::LcdConfig;
use charlcd_gpio::raw::RawGpioPort;
use eyre::{WrapErr, eyre};
use serde::{Deserialize, Serialize};
use std::env::var;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

/// Which ports the display is wired to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// A simulated display, logged instead of shown.
    Sim { busy_polls: u32 },
    /// Memory-mapped port registers. `*_base` is the address of the port's input register.
    Raw {
        path: String,
        control_base: u64,
        data_base: u64,
    },
    /// Lines of a GPIO chip, indexed by port bit.
    Gpiod {
        chip: String,
        control_lines: [Option<u32>; PORT_WIDTH],
        data_lines: [Option<u32>; PORT_WIDTH],
    },
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Sim { .. } => "sim",
            Backend::Raw { .. } => "raw",
            Backend::Gpiod { .. } => "gpiod",
        }
    }

    /// The default wiring of each backend kind.
    pub fn default_for(kind: &str) -> Option<Self> {
        match kind {
            "sim" => Some(Backend::Sim { busy_polls: 0 }),
            "raw" => Some(Backend::Raw {
                path: "/dev/mem".to_string(),
                control_base: RawGpioPort::ATMEGA328P_PORTB,
                data_base: RawGpioPort::ATMEGA328P_PORTD,
            }),
            "gpiod" => {
                // E, R/W and RS on bits 2-4, D4-D7 on bits 4-7
                let mut control_lines = [None; PORT_WIDTH];
                control_lines[2] = Some(17);
                control_lines[3] = Some(27);
                control_lines[4] = Some(22);
                let mut data_lines = [None; PORT_WIDTH];
                data_lines[4] = Some(26);
                data_lines[5] = Some(16);
                data_lines[6] = Some(20);
                data_lines[7] = Some(21);
                Some(Backend::Gpiod {
                    chip: "/dev/gpiochip0".to_string(),
                    control_lines,
                    data_lines,
                })
            }
            _ => None,
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Sim { busy_polls: 0 }
    }
}

/// How protocol waits are done.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DelayKind {
    #[default]
    Sleep,
    Spin,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub lcd: LcdConfig,
    pub backend: Backend,
    pub delay: DelayKind,
}

impl Config {
    fn path() -> PathBuf {
        var("CONFIG_FILE")
            .unwrap_or_else(|_| "config.json".to_string())
            .into()
    }

    /// Reads the config at `path`. A missing file is `None`, a file that does not parse is an
    /// error.
    pub fn try_load(path: &Path) -> eyre::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .wrap_err_with(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(config))
    }

    pub fn save(&self, path: &Path) -> eyre::Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Loads the config file, writing the default one if there is none, then applies the
    /// `CHARLCD_*` environment overrides.
    pub fn load() -> eyre::Result<Self> {
        let mut config = Self::load_from(&Self::path())?;
        config.apply_overrides(
            var("CHARLCD_BACKEND").ok().as_deref(),
            var("CHARLCD_USE_BUSY_FLAG").ok().as_deref(),
        )?;
        Ok(config)
    }

    fn load_from(path: &Path) -> eyre::Result<Self> {
        match Self::try_load(path)? {
            Some(config) => Ok(config),
            None => {
                let config = Config::default();
                config.save(path)?;
                Ok(config)
            }
        }
    }

    fn apply_overrides(&mut self, backend: Option<&str>, use_busy_flag: Option<&str>) -> eyre::Result<()> {
        if let Some(kind) = backend {
            if kind != self.backend.kind() {
                self.backend = Backend::default_for(kind)
                    .ok_or_else(|| eyre!("Unknown backend {:?}", kind))?;
            }
        }
        if let Some(flag) = use_busy_flag {
            self.lcd.use_busy_flag = flag.trim().parse()?;
        }
        Ok(())
    }
}
