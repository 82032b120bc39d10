//! Registro binário de telemetria lido de `/dev/simtemp`.
//!
//! Formato do frame (16 bytes, ordem de bytes nativa, sem padding):
//!
//! ```text
//! ┌──────────────────┬────────────────┬────────────┐
//! │ timestamp_ns(8)  │ temp_mC(4)     │ flags(4)   │
//! │ u64              │ i32            │ u32        │
//! └──────────────────┴────────────────┴────────────┘
//! ```
//!
//! O driver escreve os campos colados (`__attribute__((packed))`), então o
//! decode é feito campo a campo com bincode em inteiros fixos, nunca por
//! reinterpretação de memória alinhada.

use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tamanho exato de um registro no fio.
pub const RECORD_SIZE: usize = 16;

/// bit0: amostra nova.
pub const FLAG_NEW_SAMPLE: u32 = 1 << 0;
/// bit1: cruzamento de threshold.
pub const FLAG_THRESHOLD_ALERT: u32 = 1 << 1;

/// Erros do codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("Leitura curta ({0} bytes, esperado {RECORD_SIZE})")]
    ShortRead(usize),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

/// Uma amostra do sensor simulado.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Timestamp monotônico (ns)
    pub timestamp_ns: u64,
    /// Temperatura em mili-graus Celsius (44123 = 44.123 °C)
    pub temperature_mc: i32,
    /// Bitfield: [`FLAG_NEW_SAMPLE`], [`FLAG_THRESHOLD_ALERT`]
    pub flags: u32,
}

impl TelemetryRecord {
    /// `true` sse o bit de alerta está setado, independente dos demais bits.
    pub fn alert(&self) -> bool {
        self.flags & FLAG_THRESHOLD_ALERT != 0
    }

    pub fn new_sample(&self) -> bool {
        self.flags & FLAG_NEW_SAMPLE != 0
    }

    /// Temperatura em °C (divisão em ponto flutuante).
    pub fn temperature_celsius(&self) -> f64 {
        f64::from(self.temperature_mc) / 1000.0
    }

    /// Codifica o registro no layout do driver.
    pub fn encode(&self) -> Result<[u8; RECORD_SIZE], RecordError> {
        let bytes = wire_options()
            .serialize(self)
            .map_err(|e| RecordError::Serialize(e.to_string()))?;
        let len = bytes.len();
        bytes.try_into().map_err(|_| RecordError::Serialize(format!("{len} bytes gerados")))
    }
}

/// Linha legível: `<ts> temp=<C.CCC>C alert=<0|1>`.
impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} temp={:.3}C alert={}",
            self.timestamp_ns,
            self.temperature_celsius(),
            u8::from(self.alert())
        )
    }
}

/// Decodifica exatamente um registro.
///
/// Qualquer tamanho diferente de [`RECORD_SIZE`] (menor ou maior) vira
/// [`RecordError::ShortRead`]; o chamador loga e segue esperando.
pub fn decode_record(data: &[u8]) -> Result<TelemetryRecord, RecordError> {
    if data.len() != RECORD_SIZE {
        return Err(RecordError::ShortRead(data.len()));
    }

    wire_options()
        .deserialize(data)
        .map_err(|e| RecordError::Deserialize(e.to_string()))
}

// Inteiros de largura fixa, endianness nativa (mesmo layout do struct C).
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_native_endian()
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> TelemetryRecord {
        TelemetryRecord {
            timestamp_ns: 1_234_567_890_123,
            temperature_mc: 44_123,
            flags: FLAG_NEW_SAMPLE,
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let original = sample_record();
        let encoded = original.encode().unwrap();
        assert_eq!(encoded.len(), RECORD_SIZE);
        assert_eq!(decode_record(&encoded).unwrap(), original);
    }

    #[test]
    fn decode_then_encode_reproduces_bytes() {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[..8].copy_from_slice(&0xDEAD_BEEF_0000_0001u64.to_ne_bytes());
        bytes[8..12].copy_from_slice(&(-12_500i32).to_ne_bytes());
        bytes[12..].copy_from_slice(&0xFFFF_FFFFu32.to_ne_bytes());

        let record = decode_record(&bytes).unwrap();
        assert_eq!(record.timestamp_ns, 0xDEAD_BEEF_0000_0001);
        assert_eq!(record.temperature_mc, -12_500);
        assert_eq!(record.flags, u32::MAX);
        assert_eq!(record.encode().unwrap(), bytes);
    }

    #[test]
    fn fields_are_packed_without_padding() {
        let record = TelemetryRecord {
            timestamp_ns: 1,
            temperature_mc: 2,
            flags: 3,
        };
        let bytes = record.encode().unwrap();
        assert_eq!(&bytes[..8], &1u64.to_ne_bytes());
        assert_eq!(&bytes[8..12], &2i32.to_ne_bytes());
        assert_eq!(&bytes[12..], &3u32.to_ne_bytes());
    }

    #[cfg(target_endian = "little")]
    #[test]
    fn decodes_reference_frame() {
        let bytes = [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // timestamp
            0xE8, 0x03, 0x00, 0x00, // 1000 mC
            0x02, 0x00, 0x00, 0x00, // THRESHOLD_ALERT
        ];
        let record = decode_record(&bytes).unwrap();
        assert_eq!(record.timestamp_ns, 0x0100_0000_0000_0000);
        assert_eq!(record.temperature_mc, 1000);
        assert_eq!(record.temperature_celsius(), 1.0);
        assert!(record.alert());
        assert!(!record.new_sample());
        assert_eq!(record.to_string(), "72057594037927936 temp=1.000C alert=1");
    }

    #[test]
    fn rejects_every_wrong_length() {
        let buf = [0xAAu8; 64];
        for len in (0..RECORD_SIZE).chain(RECORD_SIZE + 1..buf.len()) {
            assert_eq!(
                decode_record(&buf[..len]),
                Err(RecordError::ShortRead(len)),
                "len {len}"
            );
        }
    }

    #[test]
    fn alert_depends_only_on_bit1() {
        let samples = [0u32, 1, 2, 3, 4, 6, 0x8000_0000, 0xFFFF_FFFD, u32::MAX];
        for flags in samples {
            let record = TelemetryRecord { flags, ..Default::default() };
            assert_eq!(record.alert(), flags & 0b10 != 0, "flags {flags:#x}");
        }
    }

    #[test]
    fn display_uses_three_decimals() {
        let record = TelemetryRecord {
            timestamp_ns: 42,
            temperature_mc: -15,
            flags: FLAG_NEW_SAMPLE,
        };
        assert_eq!(record.to_string(), "42 temp=-0.015C alert=0");
        assert!(record.new_sample());
    }
}
