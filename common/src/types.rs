//! Common Types for the LTE Downlink Receiver
//!
//! Defines the cell identity and numerology types shared by the
//! synchronization and channel estimation stages

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

/// Physical layer cell identity (N_id_cell = 3 * N_id_1 + N_id_2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIdentity {
    /// Physical layer cell identity group (secondary index, 0-167)
    pub n_id_1: u16,
    /// Physical layer identity within the group (primary index, 0-2)
    pub n_id_2: u8,
}

impl CellIdentity {
    /// Maximum valid N_id_1 value
    pub const MAX_N_ID_1: u16 = 167;
    /// Maximum valid N_id_2 value
    pub const MAX_N_ID_2: u8 = 2;
    /// Maximum valid physical cell identity (0-503)
    pub const MAX_PCI: u16 = 503;

    /// Create a new cell identity with validation
    pub fn new(n_id_1: u16, n_id_2: u8) -> Option<Self> {
        if n_id_1 <= Self::MAX_N_ID_1 && n_id_2 <= Self::MAX_N_ID_2 {
            Some(Self { n_id_1, n_id_2 })
        } else {
            None
        }
    }

    /// Split a physical cell identity into its group and sector parts
    pub fn from_pci(pci: u16) -> Option<Self> {
        if pci > Self::MAX_PCI {
            return None;
        }
        Some(Self {
            n_id_1: pci / 3,
            n_id_2: (pci % 3) as u8,
        })
    }

    /// Combined physical cell identity
    pub fn id(&self) -> u16 {
        3 * self.n_id_1 + self.n_id_2 as u16
    }
}

impl std::fmt::Display for CellIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (N_id_1={}, N_id_2={})", self.id(), self.n_id_1, self.n_id_2)
    }
}

/// Cyclic prefix length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclicPrefix {
    /// Normal CP (7 symbols per slot)
    Normal,
    /// Extended CP (6 symbols per slot)
    Extended,
}

impl CyclicPrefix {
    /// Number of OFDM symbols per slot
    pub fn symbols_per_slot(&self) -> usize {
        match self {
            CyclicPrefix::Normal => 7,
            CyclicPrefix::Extended => 6,
        }
    }

    /// Number of OFDM symbols per subframe
    pub fn symbols_per_subframe(&self) -> usize {
        2 * self.symbols_per_slot()
    }

    /// CP length in samples of symbol `symbol_in_slot` for the given FFT size
    pub fn cp_len(&self, symbol_in_slot: usize, fft_size: usize) -> usize {
        let base = match self {
            CyclicPrefix::Normal if symbol_in_slot == 0 => 160,
            CyclicPrefix::Normal => 144,
            CyclicPrefix::Extended => 512,
        };
        base * fft_size / 2048
    }

    /// Offset from the subframe start to the first CP sample of symbol `l`
    pub fn symbol_start(&self, l: usize, fft_size: usize) -> usize {
        let nsymb = self.symbols_per_slot();
        let slot = l / nsymb;
        let within = l % nsymb;
        let mut offset = slot * slot_len(fft_size);
        for i in 0..within {
            offset += self.cp_len(i, fft_size) + fft_size;
        }
        offset
    }

    /// Offset from the subframe start to the first useful sample of symbol `l`
    pub fn useful_start(&self, l: usize, fft_size: usize) -> usize {
        self.symbol_start(l, fft_size) + self.cp_len(l % self.symbols_per_slot(), fft_size)
    }

    /// N_cp flag used by the cell-specific reference signal initialization
    pub fn n_cp(&self) -> u32 {
        match self {
            CyclicPrefix::Normal => 1,
            CyclicPrefix::Extended => 0,
        }
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplexMode {
    /// Frequency Division Duplex (frame structure type 1)
    Fdd,
    /// Time Division Duplex (frame structure type 2)
    Tdd,
}

impl DuplexMode {
    /// Subframes carrying the PSS
    pub fn pss_subframes(&self) -> [u32; 2] {
        match self {
            DuplexMode::Fdd => [0, 5],
            DuplexMode::Tdd => [1, 6],
        }
    }

    /// Whether `sf_idx` carries a PSS
    pub fn is_pss_subframe(&self, sf_idx: u32) -> bool {
        self.pss_subframes().contains(&sf_idx)
    }

    /// Subframe symbol carrying the PSS
    pub fn pss_symbol(&self, cp: CyclicPrefix) -> usize {
        match self {
            DuplexMode::Fdd => cp.symbols_per_slot() - 1,
            DuplexMode::Tdd => 2,
        }
    }

    /// Symbol of subframes 0 and 5 carrying the SSS
    pub fn sss_symbol(&self, cp: CyclicPrefix) -> usize {
        match self {
            DuplexMode::Fdd => cp.symbols_per_slot() - 2,
            DuplexMode::Tdd => cp.symbols_per_subframe() - 1,
        }
    }
}

/// Number of cell-specific antenna ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AntennaPorts {
    /// Single port
    One = 1,
    /// Two ports
    Two = 2,
    /// Four ports
    Four = 4,
}

impl AntennaPorts {
    /// Number of ports as a count
    pub fn count(&self) -> usize {
        *self as usize
    }
}

impl TryFrom<u8> for AntennaPorts {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        AntennaPorts::from_u8(value).ok_or_else(|| format!("invalid number of antenna ports: {}", value))
    }
}

impl From<AntennaPorts> for u8 {
    fn from(ports: AntennaPorts) -> u8 {
        ports as u8
    }
}

/// Resolved LTE cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Physical cell identity
    pub identity: CellIdentity,
    /// Number of downlink resource blocks
    pub nof_prb: u32,
    /// Number of cell-specific antenna ports
    pub nof_ports: AntennaPorts,
    /// Cyclic prefix length
    pub cp: CyclicPrefix,
    /// Duplex mode
    pub duplex: DuplexMode,
}

impl Cell {
    /// Physical cell identity value
    pub fn id(&self) -> u16 {
        self.identity.id()
    }

    /// Number of resource elements per OFDM symbol
    pub fn nof_re(&self) -> usize {
        nof_re(self.nof_prb)
    }

    /// Number of OFDM symbols per subframe
    pub fn nof_symbols(&self) -> usize {
        self.cp.symbols_per_subframe()
    }

    /// FFT size used for this bandwidth
    pub fn fft_size(&self) -> Option<usize> {
        symbol_sz(self.nof_prb)
    }
}

/// Subcarriers per resource block
pub const NRE: usize = 12;
/// Largest supported downlink bandwidth in resource blocks
pub const MAX_PRB: u32 = 110;
/// LTE subcarrier spacing in Hz
pub const SUBCARRIER_SPACING_HZ: f32 = 15_000.0;
/// Subframes per radio frame
pub const NOF_SF_X_FRAME: u32 = 10;
/// System frame number modulus
pub const NOF_SFN: u32 = 1024;
/// Length of the synchronization sequences in the frequency domain
pub const SYNC_SEQ_LEN: usize = 62;

/// FFT size for a bandwidth in resource blocks
pub fn symbol_sz(nof_prb: u32) -> Option<usize> {
    match nof_prb {
        0 => None,
        1..=6 => Some(128),
        7..=15 => Some(256),
        16..=25 => Some(512),
        26..=50 => Some(1024),
        51..=75 => Some(1536),
        76..=110 => Some(2048),
        _ => None,
    }
}

/// Number of resource elements per OFDM symbol
pub fn nof_re(nof_prb: u32) -> usize {
    nof_prb as usize * NRE
}

/// Samples per subframe
pub fn sf_len(fft_size: usize) -> usize {
    15 * fft_size
}

/// Samples per slot
pub fn slot_len(fft_size: usize) -> usize {
    sf_len(fft_size) / 2
}

/// Sample rate in Hz
pub fn sampling_rate_hz(fft_size: usize) -> f64 {
    fft_size as f64 * SUBCARRIER_SPACING_HZ as f64
}
