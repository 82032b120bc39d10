//! Configuração unificada via TOML.
//!
//! Constantes de execução (caminhos, timeout do poll, parâmetros do
//! self-test) vivem num único `config.toml`, lido uma vez no startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Teto do prazo do self-test (24 h).
pub const MAX_SELF_TEST_SECS: f64 = 86_400.0;

/// Caminhos e temporização do dispositivo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Character device do driver
    pub device_path: String,
    /// Diretório sysfs dos atributos (vazio = não escreve nada)
    pub sysfs_base: String,
    /// Janela de espera do poll (ms); ao expirar imprime "no data"
    pub poll_timeout_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/simtemp".into(),
            sysfs_base: "/sys/class/misc/simtemp".into(),
            poll_timeout_ms: 5000,
        }
    }
}

/// Parâmetros do modo `--test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfTestConfig {
    /// Threshold rebaixado para provocar cruzamentos (m°C)
    pub threshold_mc: i32,
    /// Tempo máximo esperando o primeiro alerta (s). 0 = sem limite
    pub max_duration_secs: f64,
}

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self {
            threshold_mc: 26_000,
            max_duration_secs: 30.0,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub self_test: SelfTestConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml (ao lado do executável).
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.device.device_path.is_empty() {
            errors.push("Caminho do dispositivo não pode ser vazio".into());
        }
        if self.device.poll_timeout_ms == 0 || self.device.poll_timeout_ms > i32::MAX as u64 {
            errors.push(format!(
                "Timeout do poll inválido: {} ms (1–{})",
                self.device.poll_timeout_ms,
                i32::MAX
            ));
        }
        let max = self.self_test.max_duration_secs;
        if !max.is_finite() || !(0.0..=MAX_SELF_TEST_SECS).contains(&max) {
            errors.push(format!(
                "Duração máxima do self-test inválida: {max} (0–{MAX_SELF_TEST_SECS})"
            ));
        }

        errors
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.device.poll_timeout_ms)
    }

    /// `None` quando o self-test pode esperar indefinidamente.
    ///
    /// Valores fora do intervalo aceito por [`AppConfig::validate`] também
    /// resultam em `None`, nunca em pânico.
    pub fn self_test_deadline(&self) -> Option<Duration> {
        let secs = self.self_test.max_duration_secs;
        if secs <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(secs).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
        assert_eq!(config.poll_timeout(), Duration::from_millis(5000));
        assert_eq!(config.self_test_deadline(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.device.device_path, parsed.device.device_path);
        assert_eq!(config.self_test.threshold_mc, parsed.self_test.threshold_mc);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[device]
poll_timeout_ms = 250
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.device.poll_timeout_ms, 250);
        // Outros campos devem ter valor padrão
        assert_eq!(config.device.device_path, "/dev/simtemp");
        assert_eq!(config.self_test.threshold_mc, 26_000);
    }

    #[test]
    fn zero_duration_disables_deadline() {
        let mut config = AppConfig::default();
        config.self_test.max_duration_secs = 0.0;
        assert!(config.validate().is_empty());
        assert_eq!(config.self_test_deadline(), None);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = AppConfig::default();
        config.device.poll_timeout_ms = 0;
        config.device.device_path.clear();
        config.self_test.max_duration_secs = -1.0;
        assert_eq!(config.validate().len(), 3);
    }

    #[test]
    fn huge_self_test_duration_is_rejected_without_panic() {
        let mut config = AppConfig::default();
        for secs in [1e20, f64::MAX, MAX_SELF_TEST_SECS + 1.0] {
            config.self_test.max_duration_secs = secs;
            assert_eq!(config.validate().len(), 1, "{secs}");
            // Mesmo sem validar, o cálculo do prazo não pode abortar
            let _ = config.self_test_deadline();
        }
        config.self_test.max_duration_secs = f64::INFINITY;
        assert_eq!(config.validate().len(), 1);
        assert_eq!(config.self_test_deadline(), None);

        config.self_test.max_duration_secs = MAX_SELF_TEST_SECS;
        assert!(config.validate().is_empty());
        assert_eq!(config.self_test_deadline(), Some(Duration::from_secs(86_400)));
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("nao_existe.toml"));
        assert_eq!(config.device.poll_timeout_ms, 5000);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.device.sysfs_base = String::new();
        config.self_test.threshold_mc = 31_000;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert!(loaded.device.sysfs_base.is_empty());
        assert_eq!(loaded.self_test.threshold_mc, 31_000);
    }
}
