//! Pitch classes and musical keys
//!
//! Keys are rendered the way the upload form shows them: the root name
//! followed by the mode, e.g. "A Minor" or "C# Major".

use crate::error::AnalysisError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One of the 12 notes of the chromatic scale, irrespective of octave
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    /// All pitch classes in chromatic order starting at C
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Pitch class from its chromatic index (0 = C), wrapping past 11
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    /// Chromatic index (0 = C, 11 = B)
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Name using sharps, e.g. "F#"
    pub fn name(&self) -> &'static str {
        use PitchClass::*;
        match self {
            C => "C",
            CSharp => "C#",
            D => "D",
            DSharp => "D#",
            E => "E",
            F => "F",
            FSharp => "F#",
            G => "G",
            GSharp => "G#",
            A => "A",
            ASharp => "A#",
            B => "B",
        }
    }

    /// Reference frequency in the fourth octave (C4 = 261.63 Hz)
    pub fn base_frequency(&self) -> f64 {
        use PitchClass::*;
        match self {
            C => 261.63,
            CSharp => 277.18,
            D => 293.66,
            DSharp => 311.13,
            E => 329.63,
            F => 349.23,
            FSharp => 369.99,
            G => 392.00,
            GSharp => 415.30,
            A => 440.00,
            ASharp => 466.16,
            B => 493.88,
        }
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PitchClass {
    type Err = AnalysisError;

    /// Accepts sharp names and their flat spellings ("Db", "Bb", ...)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PitchClass::*;
        let pc = match s.trim() {
            "C" => C,
            "C#" | "Db" => CSharp,
            "D" => D,
            "D#" | "Eb" => DSharp,
            "E" => E,
            "F" => F,
            "F#" | "Gb" => FSharp,
            "G" => G,
            "G#" | "Ab" => GSharp,
            "A" => A,
            "A#" | "Bb" => ASharp,
            "B" => B,
            other => return Err(AnalysisError::UnknownPitchClass(other.to_string())),
        };
        Ok(pc)
    }
}

/// Key mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Mode {
    Major,
    Minor,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Major => f.write_str("Major"),
            Mode::Minor => f.write_str("Minor"),
        }
    }
}

impl FromStr for Mode {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("major") {
            Ok(Mode::Major)
        } else if s.eq_ignore_ascii_case("minor") {
            Ok(Mode::Minor)
        } else {
            Err(AnalysisError::UnknownMode(s.to_string()))
        }
    }
}

/// Musical key (24 possible: 12 roots x major/minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MusicalKey {
    pub root: PitchClass,
    pub mode: Mode,
}

impl MusicalKey {
    /// Key used when no frame carries usable energy
    pub const FALLBACK: MusicalKey = MusicalKey::major(PitchClass::C);

    pub const fn new(root: PitchClass, mode: Mode) -> Self {
        Self { root, mode }
    }

    pub const fn major(root: PitchClass) -> Self {
        Self::new(root, Mode::Major)
    }

    pub const fn minor(root: PitchClass) -> Self {
        Self::new(root, Mode::Minor)
    }

    pub fn is_major(&self) -> bool {
        self.mode == Mode::Major
    }
}

impl fmt::Display for MusicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.root, self.mode)
    }
}

impl FromStr for MusicalKey {
    type Err = AnalysisError;

    /// Parse "<root> <mode>", e.g. "G# Minor"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let (Some(root), Some(mode), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AnalysisError::MalformedKey(s.to_string()));
        };
        Ok(Self::new(root.parse()?, mode.parse()?))
    }
}

impl Serialize for MusicalKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MusicalKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
