//! Table, index and sequence metadata.

use std::fmt::Write as _;

use heron_types::path::{Path, PathFragment};
use heron_types::{Value, ValueType};

use crate::error::{Error, Result};

/// A constraint on one document path of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConstraint {
    /// The constrained path.
    pub path: Path,
    /// Declared type; `Any` means no type constraint.
    pub ty: ValueType,
    /// The path is the table's primary key.
    pub is_primary_key: bool,
    /// The path must be present and non-null.
    pub is_not_null: bool,
    /// Value substituted when the path is absent on write.
    pub default_value: Option<Value>,
}

impl FieldConstraint {
    /// Creates an unconstrained entry for `path`.
    pub fn new(path: Path) -> Self {
        Self {
            path,
            ty: ValueType::Any,
            is_primary_key: false,
            is_not_null: false,
            default_value: None,
        }
    }

    /// Sets the declared type.
    pub fn with_type(mut self, ty: ValueType) -> Self {
        self.ty = ty;
        self
    }

    /// Marks the path as the primary key. Implies NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_not_null = true;
        self
    }

    /// Marks the path NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.is_not_null = true;
        self
    }

    /// Sets a default value.
    pub fn with_default(mut self, v: Value) -> Self {
        self.default_value = Some(v);
        self
    }
}

/// The set of field constraints of a table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldConstraints(pub Vec<FieldConstraint>);

impl FieldConstraints {
    /// Returns the constraint on `path`, if any.
    pub fn get(&self, path: &Path) -> Option<&FieldConstraint> {
        self.0.iter().find(|fc| fc.path == *path)
    }

    /// Returns the primary-key constraint, if any.
    pub fn primary_key(&self) -> Option<&FieldConstraint> {
        self.0.iter().find(|fc| fc.is_primary_key)
    }

    /// Adds a constraint, enforcing path uniqueness and at most one
    /// primary key.
    pub fn add(&mut self, fc: FieldConstraint) -> Result<()> {
        if self.get(&fc.path).is_some() {
            return Err(Error::InvalidArgument(format!(
                "duplicate constraint on {}",
                fc.path
            )));
        }
        if fc.is_primary_key && self.primary_key().is_some() {
            return Err(Error::InvalidArgument(
                "only one primary key is allowed".to_string(),
            ));
        }
        self.0.push(fc);
        Ok(())
    }

    /// Replaces the user-declared constraints by the inferred list:
    /// a constraint on a nested path propagates to each parent path,
    /// typing it Document or Array depending on the next fragment.
    pub fn infer(&self) -> Result<FieldConstraints> {
        let mut inferred = FieldConstraints::default();

        for fc in &self.0 {
            for depth in 1..fc.path.len() {
                let parent = Path(fc.path.0[..depth].to_vec());
                let parent_ty = match &fc.path.0[depth] {
                    PathFragment::Field(_) => ValueType::Document,
                    PathFragment::Index(_) => ValueType::Array,
                };

                match inferred.0.iter_mut().find(|c| c.path == parent) {
                    Some(existing) => {
                        if existing.ty != parent_ty {
                            return Err(Error::InvalidArgument(format!(
                                "conflicting constraints on {parent}"
                            )));
                        }
                    }
                    None => inferred.0.push(FieldConstraint::new(parent).with_type(parent_ty)),
                }
            }

            match inferred.0.iter().position(|c| c.path == fc.path) {
                Some(i) => {
                    // an explicit constraint wins over an inferred parent
                    if inferred.0[i].ty != ValueType::Any
                        && fc.ty != ValueType::Any
                        && inferred.0[i].ty != fc.ty
                    {
                        return Err(Error::InvalidArgument(format!(
                            "conflicting constraints on {}",
                            fc.path
                        )));
                    }
                    let ty = if fc.ty != ValueType::Any {
                        fc.ty
                    } else {
                        inferred.0[i].ty
                    };
                    inferred.0[i] = fc.clone();
                    inferred.0[i].ty = ty;
                }
                None => inferred.add(fc.clone())?,
            }
        }

        if inferred.0.iter().filter(|fc| fc.is_primary_key).count() > 1 {
            return Err(Error::InvalidArgument(
                "only one primary key is allowed".to_string(),
            ));
        }

        Ok(inferred)
    }
}

/// Metadata of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    /// Table name, unique across tables, indexes and sequences.
    pub table_name: String,
    /// Name of the backing store.
    pub store_name: Vec<u8>,
    /// Read-only tables reject writes through user statements.
    pub read_only: bool,
    /// Field constraints, in inferred form.
    pub field_constraints: FieldConstraints,
}

impl TableInfo {
    /// Creates the metadata of an unconstrained table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table_name: name.into(),
            store_name: Vec::new(),
            read_only: false,
            field_constraints: FieldConstraints::default(),
        }
    }

    /// Adds a field constraint.
    pub fn with_constraint(mut self, fc: FieldConstraint) -> Self {
        self.field_constraints.0.push(fc);
        self
    }

    /// Returns the primary-key constraint, if any.
    pub fn primary_key(&self) -> Option<&FieldConstraint> {
        self.field_constraints.primary_key()
    }

    /// Renders the definition the way it is stored in the catalog's
    /// `sql` column.
    pub fn to_sql(&self) -> String {
        let mut out = format!("CREATE TABLE {}", self.table_name);
        if self.field_constraints.0.is_empty() {
            return out;
        }
        out.push_str(" (");
        for (i, fc) in self.field_constraints.0.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{}", fc.path);
            if fc.ty != ValueType::Any {
                let _ = write!(out, " {}", sql_type_name(fc.ty));
            }
            if fc.is_primary_key {
                out.push_str(" PRIMARY KEY");
            } else if fc.is_not_null {
                out.push_str(" NOT NULL");
            }
            if let Some(d) = &fc.default_value {
                let _ = write!(out, " DEFAULT {d}");
            }
        }
        out.push(')');
        out
    }
}

/// Metadata of an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// Index name, unique across tables, indexes and sequences.
    pub index_name: String,
    /// The indexed table.
    pub table_name: String,
    /// Name of the backing store.
    pub store_name: Vec<u8>,
    /// Indexed paths, in column order.
    pub paths: Vec<Path>,
    /// Declared type per path; `Any` for untyped slots. Aligned with
    /// `paths`.
    pub types: Vec<ValueType>,
    /// Rejects duplicate tuples.
    pub unique: bool,
    /// When set, the index enforces a table constraint and cannot be
    /// dropped by the user.
    pub constraint_path: Option<Path>,
}

impl IndexInfo {
    /// Creates the metadata of an index over `paths`.
    pub fn new(table_name: impl Into<String>, paths: Vec<Path>) -> Self {
        Self {
            index_name: String::new(),
            table_name: table_name.into(),
            store_name: Vec::new(),
            paths,
            types: Vec::new(),
            unique: false,
            constraint_path: None,
        }
    }

    /// Names the index explicitly.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.index_name = name.into();
        self
    }

    /// Makes the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Number of indexed columns.
    pub fn arity(&self) -> usize {
        self.paths.len()
    }

    /// Renders the definition the way it is stored in the catalog's
    /// `sql` column.
    pub fn to_sql(&self) -> String {
        let mut out = String::from("CREATE ");
        if self.unique {
            out.push_str("UNIQUE ");
        }
        let _ = write!(out, "INDEX {} ON {} (", self.index_name, self.table_name);
        for (i, p) in self.paths.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, "{p}");
        }
        out.push(')');
        out
    }
}

/// Metadata of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceInfo {
    /// Sequence name, unique across tables, indexes and sequences.
    pub name: String,
}

impl SequenceInfo {
    /// Creates the metadata of a sequence.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Renders the definition the way it is stored in the catalog's
    /// `sql` column.
    pub fn to_sql(&self) -> String {
        format!("CREATE SEQUENCE {}", self.name)
    }
}

fn sql_type_name(ty: ValueType) -> &'static str {
    match ty {
        ValueType::Bool => "BOOL",
        ValueType::Integer => "INTEGER",
        ValueType::Double => "DOUBLE",
        ValueType::Text => "TEXT",
        ValueType::Blob => "BLOB",
        ValueType::Array => "ARRAY",
        ValueType::Document => "DOCUMENT",
        ValueType::Null | ValueType::Any => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_propagates_parent_types() {
        let mut fcs = FieldConstraints::default();
        fcs.add(
            FieldConstraint::new(Path::field("a").then_field("b"))
                .with_type(ValueType::Integer)
                .not_null(),
        )
        .unwrap();
        fcs.add(FieldConstraint::new(Path::field("xs").then_index(0)).with_type(ValueType::Text))
            .unwrap();

        let inferred = fcs.infer().unwrap();

        let a = inferred.get(&Path::field("a")).unwrap();
        assert_eq!(a.ty, ValueType::Document);
        let xs = inferred.get(&Path::field("xs")).unwrap();
        assert_eq!(xs.ty, ValueType::Array);
        let ab = inferred
            .get(&Path::field("a").then_field("b"))
            .unwrap();
        assert_eq!(ab.ty, ValueType::Integer);
        assert!(ab.is_not_null);
    }

    #[test]
    fn test_infer_rejects_conflicts() {
        let mut fcs = FieldConstraints::default();
        fcs.add(FieldConstraint::new(Path::field("a").then_field("b")))
            .unwrap();
        fcs.add(FieldConstraint::new(Path::field("a").then_index(0)))
            .unwrap();
        assert!(fcs.infer().is_err());
    }

    #[test]
    fn test_single_primary_key() {
        let mut fcs = FieldConstraints::default();
        fcs.add(FieldConstraint::new(Path::field("a")).primary_key())
            .unwrap();
        let err = fcs.add(FieldConstraint::new(Path::field("b")).primary_key());
        assert!(err.is_err());
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let mut fcs = FieldConstraints::default();
        fcs.add(FieldConstraint::new(Path::field("a"))).unwrap();
        assert!(fcs.add(FieldConstraint::new(Path::field("a"))).is_err());
    }

    #[test]
    fn test_table_info_sql() {
        let info = TableInfo::new("users")
            .with_constraint(
                FieldConstraint::new(Path::field("id"))
                    .with_type(ValueType::Integer)
                    .primary_key(),
            )
            .with_constraint(FieldConstraint::new(Path::field("name")).with_type(ValueType::Text));
        assert_eq!(
            info.to_sql(),
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"
        );
    }

    #[test]
    fn test_index_info_sql() {
        let info = IndexInfo::new("users", vec![Path::field("age")])
            .with_name("users_age_idx")
            .unique();
        assert_eq!(
            info.to_sql(),
            "CREATE UNIQUE INDEX users_age_idx ON users (age)"
        );
    }
}
