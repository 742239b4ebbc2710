use std::collections::BTreeSet;

use tabplan_expr::ColumnType;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub data_type: ColumnType,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Which source columns a reader has to decode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Projection {
    All,
    Only(BTreeSet<String>),
    AllExcept(BTreeSet<String>),
}

impl Projection {
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Projection::All => true,
            Projection::Only(names) => names.contains(name),
            Projection::AllExcept(names) => !names.contains(name),
        }
    }

    /// Additionally require `names`.
    pub fn require<'a>(self, names: impl IntoIterator<Item = &'a str>) -> Self {
        match self {
            Projection::All => Projection::All,
            Projection::Only(mut set) => {
                set.extend(names.into_iter().map(str::to_string));
                Projection::Only(set)
            }
            Projection::AllExcept(mut set) => {
                for name in names {
                    set.remove(name);
                }
                Projection::AllExcept(set)
            }
        }
    }

    /// Stop requiring `names` (they are not needed by anything downstream).
    pub fn release<'a>(self, names: impl IntoIterator<Item = &'a str>) -> Self {
        match self {
            Projection::All => {
                Projection::AllExcept(names.into_iter().map(str::to_string).collect())
            }
            Projection::Only(mut set) => {
                for name in names {
                    set.remove(name);
                }
                Projection::Only(set)
            }
            Projection::AllExcept(mut set) => {
                set.extend(names.into_iter().map(str::to_string));
                Projection::AllExcept(set)
            }
        }
    }
}
