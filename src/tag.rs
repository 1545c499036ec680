use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Memory category a region is attributed to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum MemTag {
    JavaHeap,
    Class,
    Thread,
    ThreadStack,
    Code,
    Gc,
    Compiler,
    Internal,
    Symbol,
    Tracking,
    Shared,
    Chunk,
    Metaspace,
    Test,
    Other,
    #[default]
    None,
}

impl MemTag {
    pub const COUNT: usize = 16;

    pub const ALL: [MemTag; MemTag::COUNT] = [
        MemTag::JavaHeap,
        MemTag::Class,
        MemTag::Thread,
        MemTag::ThreadStack,
        MemTag::Code,
        MemTag::Gc,
        MemTag::Compiler,
        MemTag::Internal,
        MemTag::Symbol,
        MemTag::Tracking,
        MemTag::Shared,
        MemTag::Chunk,
        MemTag::Metaspace,
        MemTag::Test,
        MemTag::Other,
        MemTag::None,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            MemTag::JavaHeap => "Java Heap",
            MemTag::Class => "Class",
            MemTag::Thread => "Thread",
            MemTag::ThreadStack => "Thread Stack",
            MemTag::Code => "Code",
            MemTag::Gc => "GC",
            MemTag::Compiler => "Compiler",
            MemTag::Internal => "Internal",
            MemTag::Symbol => "Symbol",
            MemTag::Tracking => "Native Memory Tracking",
            MemTag::Shared => "Shared class space",
            MemTag::Chunk => "Arena Chunk",
            MemTag::Metaspace => "Metaspace",
            MemTag::Test => "Test",
            MemTag::Other => "Other",
            MemTag::None => "Unknown",
        }
    }

    /// Short identifier accepted by [`FromStr`].
    pub fn ident(self) -> &'static str {
        match self {
            MemTag::JavaHeap => "heap",
            MemTag::Class => "class",
            MemTag::Thread => "thread",
            MemTag::ThreadStack => "thread-stack",
            MemTag::Code => "code",
            MemTag::Gc => "gc",
            MemTag::Compiler => "compiler",
            MemTag::Internal => "internal",
            MemTag::Symbol => "symbol",
            MemTag::Tracking => "nmt",
            MemTag::Shared => "shared",
            MemTag::Chunk => "chunk",
            MemTag::Metaspace => "metaspace",
            MemTag::Test => "test",
            MemTag::Other => "other",
            MemTag::None => "none",
        }
    }
}

impl fmt::Display for MemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown memory tag: {0}")]
pub struct UnknownTag(pub String);

impl FromStr for MemTag {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemTag::ALL
            .into_iter()
            .find(|tag| tag.ident().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTag(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_matches_table() {
        for (i, tag) in MemTag::ALL.iter().enumerate() {
            assert_eq!(tag.index(), i);
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("gc".parse::<MemTag>(), Ok(MemTag::Gc));
        assert_eq!("Thread-Stack".parse::<MemTag>(), Ok(MemTag::ThreadStack));
        assert_eq!(
            "bogus".parse::<MemTag>(),
            Err(UnknownTag("bogus".to_owned()))
        );
    }
}
