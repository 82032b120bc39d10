//! Configuração do driver via atributos sysfs.
//!
//! Toda escrita é best-effort: falhas (permissão, atributo ausente, I/O)
//! são logadas como warning e nunca interrompem a telemetria. O device
//! continua com a configuração que já tinha.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Atributos graváveis expostos pelo driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    SamplingMs,
    ThresholdMc,
    Mode,
}

impl Attribute {
    /// Nome do arquivo sob o diretório sysfs.
    pub fn name(self) -> &'static str {
        match self {
            Attribute::SamplingMs => "sampling_ms",
            Attribute::ThresholdMc => "threshold_mC",
            Attribute::Mode => "mode",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

/// Modo de geração do sensor simulado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Noisy,
    Ramp,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Normal, Mode::Noisy, Mode::Ramp];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Noisy => "noisy",
            Mode::Ramp => "ramp",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| ConfigError::InvalidMode(s.to_string()))
    }
}

/// Erros de acesso ao sysfs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{attr}: {source}")]
    Io {
        attr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{attr}: escrita parcial")]
    ShortWrite { attr: String },

    #[error("Modo inválido: '{0}' (normal, noisy, ramp)")]
    InvalidMode(String),

    #[error("sysfs desabilitado")]
    Disabled,
}

/// Porta de configuração consumida pelo core.
pub trait ConfigPort {
    /// Escreve `value` no atributo. O chamador decide o que fazer com o erro.
    fn apply(&mut self, attr: Attribute, value: &str) -> Result<(), ConfigError>;
}

/// Valores que o usuário quer aplicar. `None` = mantém o default do device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub sampling_ms: Option<u32>,
    pub threshold_mc: Option<i32>,
    pub mode: Option<Mode>,
}

impl ConfigSnapshot {
    pub fn is_empty(&self) -> bool {
        self.sampling_ms.is_none() && self.threshold_mc.is_none() && self.mode.is_none()
    }
}

/// Aplica o snapshot antes do loop. Retorna quantas escritas tiveram sucesso.
pub fn apply_snapshot<P: ConfigPort + ?Sized>(port: &mut P, snapshot: &ConfigSnapshot) -> usize {
    let mut applied = 0;
    if let Some(ms) = snapshot.sampling_ms {
        applied += usize::from(apply_best_effort(port, Attribute::SamplingMs, ms));
    }
    if let Some(mc) = snapshot.threshold_mc {
        applied += usize::from(apply_best_effort(port, Attribute::ThresholdMc, mc));
    }
    if let Some(mode) = snapshot.mode {
        applied += usize::from(apply_best_effort(port, Attribute::Mode, mode));
    }
    applied
}

/// Rebaixa o threshold para o self-test, sobrescrevendo o valor do snapshot.
pub fn arm_self_test<P: ConfigPort + ?Sized>(port: &mut P, threshold_mc: i32) -> bool {
    info!("Self-test: threshold rebaixado para {threshold_mc} m°C");
    apply_best_effort(port, Attribute::ThresholdMc, threshold_mc)
}

fn apply_best_effort<P, V>(port: &mut P, attr: Attribute, value: V) -> bool
where
    P: ConfigPort + ?Sized,
    V: fmt::Display,
{
    match port.apply(attr, &value.to_string()) {
        Ok(()) => {
            debug!("sysfs {attr} = {value}");
            true
        }
        Err(e) => {
            warn!("sysfs {attr}: {e}");
            false
        }
    }
}

/// Contadores do atributo `stats` (`key=value` por linha).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub total_samples: u64,
    pub threshold_crossings: u64,
}

impl DeviceStats {
    /// Chaves desconhecidas e linhas malformadas são ignoradas.
    pub fn parse(text: &str) -> Self {
        let mut stats = DeviceStats::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let Ok(value) = value.trim().parse::<u64>() else {
                debug!("stats: valor inválido em '{line}'");
                continue;
            };
            match key.trim() {
                "total_samples" => stats.total_samples = value,
                "threshold_crossings" => stats.threshold_crossings = value,
                _ => {}
            }
        }
        stats
    }
}

/// [`ConfigPort`] sobre arquivos em `/sys/class/misc/simtemp`.
#[derive(Debug, Clone)]
pub struct SysfsPort {
    base: Option<PathBuf>,
}

impl SysfsPort {
    /// Base vazia desabilita todas as escritas.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        if base.as_os_str().is_empty() {
            info!("sysfs desabilitado: configuração do device não será alterada");
            return Self { base: None };
        }
        Self { base: Some(base) }
    }

    pub fn base(&self) -> Option<&Path> {
        self.base.as_deref()
    }

    /// Lê um atributo (sem o `\n` final).
    pub fn read(&self, name: &str) -> Result<String, ConfigError> {
        let base = self.base.as_ref().ok_or(ConfigError::Disabled)?;
        std::fs::read_to_string(base.join(name))
            .map(|s| s.trim().to_string())
            .map_err(|source| ConfigError::Io {
                attr: name.to_string(),
                source,
            })
    }

    pub fn read_stats(&self) -> Result<DeviceStats, ConfigError> {
        self.read("stats").map(|text| DeviceStats::parse(&text))
    }
}

impl ConfigPort for SysfsPort {
    fn apply(&mut self, attr: Attribute, value: &str) -> Result<(), ConfigError> {
        let Some(base) = &self.base else {
            debug!("sysfs desabilitado, ignorando {attr}={value}");
            return Ok(());
        };

        let io_err = |source| ConfigError::Io {
            attr: attr.name().to_string(),
            source,
        };

        // Atributos são arquivos pequenos: open/write/close basta.
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(base.join(attr.name()))
            .map_err(io_err)?;

        let payload = format!("{value}\n");
        let written = file.write(payload.as_bytes()).map_err(io_err)?;
        if written != payload.len() {
            return Err(ConfigError::ShortWrite {
                attr: attr.name().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_sysfs() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in ["sampling_ms", "threshold_mC", "mode"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        std::fs::write(
            dir.path().join("stats"),
            "total_samples=120\nthreshold_crossings=7\n",
        )
        .unwrap();
        dir
    }

    /// Porta em memória que falha para atributos escolhidos.
    #[derive(Default)]
    struct RecordingPort {
        writes: Vec<(Attribute, String)>,
        failing: Vec<Attribute>,
    }

    impl ConfigPort for RecordingPort {
        fn apply(&mut self, attr: Attribute, value: &str) -> Result<(), ConfigError> {
            if self.failing.contains(&attr) {
                return Err(ConfigError::Io {
                    attr: attr.name().into(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            self.writes.push((attr, value.to_string()));
            Ok(())
        }
    }

    #[test]
    fn writes_value_with_trailing_newline() {
        let dir = fake_sysfs();
        let mut port = SysfsPort::new(dir.path());
        port.apply(Attribute::ThresholdMc, "36000").unwrap();
        let raw = std::fs::read_to_string(dir.path().join("threshold_mC")).unwrap();
        assert_eq!(raw, "36000\n");
        assert_eq!(port.read("threshold_mC").unwrap(), "36000");
    }

    #[test]
    fn missing_attribute_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut port = SysfsPort::new(dir.path());
        let err = port.apply(Attribute::Mode, "ramp").unwrap_err();
        assert!(matches!(err, ConfigError::Io { ref attr, .. } if attr == "mode"));
        // Nunca cria o arquivo
        assert!(!dir.path().join("mode").exists());
    }

    #[test]
    fn empty_base_skips_writes() {
        let mut port = SysfsPort::new("");
        assert!(port.base().is_none());
        assert!(port.apply(Attribute::SamplingMs, "100").is_ok());
        assert!(matches!(port.read("mode"), Err(ConfigError::Disabled)));
    }

    #[test]
    fn snapshot_applies_only_present_fields() {
        let mut port = RecordingPort::default();
        let snapshot = ConfigSnapshot {
            sampling_ms: Some(250),
            threshold_mc: None,
            mode: Some(Mode::Ramp),
        };
        assert_eq!(apply_snapshot(&mut port, &snapshot), 2);
        assert_eq!(
            port.writes,
            vec![
                (Attribute::SamplingMs, "250".to_string()),
                (Attribute::Mode, "ramp".to_string()),
            ]
        );
    }

    #[test]
    fn failures_are_swallowed() {
        let mut port = RecordingPort {
            failing: vec![Attribute::SamplingMs],
            ..Default::default()
        };
        let snapshot = ConfigSnapshot {
            sampling_ms: Some(5),
            threshold_mc: Some(30_000),
            mode: None,
        };
        assert_eq!(apply_snapshot(&mut port, &snapshot), 1);
        assert_eq!(port.writes, vec![(Attribute::ThresholdMc, "30000".to_string())]);
    }

    #[test]
    fn self_test_overrides_threshold() {
        let dir = fake_sysfs();
        let mut port = SysfsPort::new(dir.path());
        let snapshot = ConfigSnapshot {
            threshold_mc: Some(45_000),
            ..Default::default()
        };
        apply_snapshot(&mut port, &snapshot);
        assert!(arm_self_test(&mut port, 26_000));
        assert_eq!(port.read("threshold_mC").unwrap(), "26000");
    }

    #[test]
    fn reads_mode_and_stats() {
        let dir = fake_sysfs();
        let mut port = SysfsPort::new(dir.path());
        port.apply(Attribute::Mode, &Mode::Noisy.to_string()).unwrap();
        assert_eq!(port.read("mode").unwrap().parse::<Mode>().unwrap(), Mode::Noisy);
        assert_eq!(
            port.read_stats().unwrap(),
            DeviceStats {
                total_samples: 120,
                threshold_crossings: 7,
            }
        );
    }

    #[test]
    fn stats_parser_ignores_noise() {
        let stats = DeviceStats::parse("foo=1\ntotal_samples = 9\nbroken\nthreshold_crossings=x\n");
        assert_eq!(stats.total_samples, 9);
        assert_eq!(stats.threshold_crossings, 0);
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("ramp\n".parse::<Mode>().unwrap(), Mode::Ramp);
        assert!(matches!("invalid".parse::<Mode>(), Err(ConfigError::InvalidMode(_))));
        assert!(ConfigSnapshot::default().is_empty());
    }
}
