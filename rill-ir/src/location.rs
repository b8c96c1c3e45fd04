//! Source locations threaded from the input graph's debug side table
//! onto every produced operation.

use itertools::Itertools;
use rill_utils::Id;

/// Provenance of an IR construct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Unknown,
    /// A named construct, optionally anchored at a child location.
    Name(Id, Box<Location>),
    /// A concrete file position.
    FileLineCol { file: Id, line: u32, col: u32 },
    /// `callee` invoked from `caller`.
    CallSite {
        callee: Box<Location>,
        caller: Box<Location>,
    },
    /// Several locations fused into one (a node derived from multiple
    /// original nodes).
    Fused(Vec<Location>),
}

impl Location {
    pub fn name<S: Into<Id>>(name: S) -> Self {
        Location::Name(name.into(), Box::new(Location::Unknown))
    }

    pub fn name_at<S: Into<Id>>(name: S, child: Location) -> Self {
        Location::Name(name.into(), Box::new(child))
    }

    pub fn file_line_col<S: Into<Id>>(file: S, line: u32, col: u32) -> Self {
        Location::FileLineCol {
            file: file.into(),
            line,
            col,
        }
    }

    pub fn call_site(callee: Location, caller: Location) -> Self {
        Location::CallSite {
            callee: Box::new(callee),
            caller: Box::new(caller),
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::Unknown
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Unknown => write!(f, "loc(unknown)"),
            Location::Name(name, child) => {
                if matches!(**child, Location::Unknown) {
                    write!(f, "loc(\"{}\")", name)
                } else {
                    write!(f, "loc(\"{}\" at {})", name, child)
                }
            }
            Location::FileLineCol { file, line, col } => {
                write!(f, "loc(\"{}\":{}:{})", file, line, col)
            }
            Location::CallSite { callee, caller } => {
                write!(f, "loc(callsite({} from {}))", callee, caller)
            }
            Location::Fused(locs) => {
                let rendered = locs
                    .iter()
                    .map(|l| l.to_string())
                    .join(", ");
                write!(f, "loc(fused[{}])", rendered)
            }
        }
    }
}
