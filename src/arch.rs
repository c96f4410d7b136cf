// src/arch.rs

//! Architecture table with stable store codes and compatibility rules

use std::fmt;
use std::str::FromStr;

/// Machine architecture of a resolvable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    Noarch,
    I386,
    I486,
    I586,
    I686,
    X86_64,
    Ia32e,
    Athlon,
    Ppc,
    Ppc64,
    S390,
    S390x,
    Ia64,
    Sparc,
    Sparc64,
    Aarch64,
    Ppc64le,
    Unknown,
}

const ALL: [Arch; 17] = [
    Arch::Noarch,
    Arch::I386,
    Arch::I486,
    Arch::I586,
    Arch::I686,
    Arch::X86_64,
    Arch::Ia32e,
    Arch::Athlon,
    Arch::Ppc,
    Arch::Ppc64,
    Arch::S390,
    Arch::S390x,
    Arch::Ia64,
    Arch::Sparc,
    Arch::Sparc64,
    Arch::Aarch64,
    Arch::Ppc64le,
];

impl Arch {
    pub fn as_str(&self) -> &str {
        match self {
            Arch::Noarch => "noarch",
            Arch::I386 => "i386",
            Arch::I486 => "i486",
            Arch::I586 => "i586",
            Arch::I686 => "i686",
            Arch::X86_64 => "x86_64",
            Arch::Ia32e => "ia32e",
            Arch::Athlon => "athlon",
            Arch::Ppc => "ppc",
            Arch::Ppc64 => "ppc64",
            Arch::S390 => "s390",
            Arch::S390x => "s390x",
            Arch::Ia64 => "ia64",
            Arch::Sparc => "sparc",
            Arch::Sparc64 => "sparc64",
            Arch::Aarch64 => "aarch64",
            Arch::Ppc64le => "ppc64le",
            Arch::Unknown => "unknown",
        }
    }

    /// Integer code stored in the `arch` columns
    pub fn code(&self) -> i32 {
        match self {
            Arch::Unknown => -1,
            known => ALL.iter().position(|a| a == known).map_or(-1, |p| p as i32),
        }
    }

    /// Decode a stored arch code; unrecognized codes read as `Unknown`
    pub fn from_code(code: i64) -> Arch {
        usize::try_from(code)
            .ok()
            .and_then(|i| ALL.get(i).copied())
            .unwrap_or(Arch::Unknown)
    }

    /// Architecture of the running host
    pub fn host() -> Arch {
        match std::env::consts::ARCH {
            "x86_64" => Arch::X86_64,
            "x86" => Arch::I686,
            "aarch64" => Arch::Aarch64,
            "powerpc" => Arch::Ppc,
            "powerpc64" if cfg!(target_endian = "little") => Arch::Ppc64le,
            "powerpc64" => Arch::Ppc64,
            "s390x" => Arch::S390x,
            "sparc64" => Arch::Sparc64,
            _ => Arch::Unknown,
        }
    }

    /// Architectures a system of this arch can install, besides noarch
    fn compat_list(&self) -> &'static [Arch] {
        use Arch::*;
        match self {
            X86_64 | Ia32e => &[X86_64, Ia32e, Athlon, I686, I586, I486, I386],
            Athlon => &[Athlon, I686, I586, I486, I386],
            I686 => &[I686, I586, I486, I386],
            I586 => &[I586, I486, I386],
            I486 => &[I486, I386],
            I386 => &[I386],
            Ia64 => &[Ia64, I686, I586, I486, I386],
            Ppc64 => &[Ppc64, Ppc],
            Ppc => &[Ppc],
            Ppc64le => &[Ppc64le],
            S390x => &[S390x, S390],
            S390 => &[S390],
            Sparc64 => &[Sparc64, Sparc],
            Sparc => &[Sparc],
            Aarch64 => &[Aarch64],
            Noarch | Unknown => &[],
        }
    }

    /// Whether a resolvable built for `self` can be installed on `system`
    pub fn is_compatible_with(&self, system: Arch) -> bool {
        *self == Arch::Noarch || system.compat_list().contains(self)
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s == "unknown" {
            return Ok(Arch::Unknown);
        }
        ALL.iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| format!("Invalid architecture: {}", s))
    }
}
