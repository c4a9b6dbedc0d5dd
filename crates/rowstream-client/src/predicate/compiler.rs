//! Predicate → parameterized WHERE clause.

use rowstream_common::error::{RowStreamError, RowStreamResult};
use rowstream_common::types::SqlType;

use super::{placeholder, BinaryOp, Parameter, Predicate, WhereClause};
use crate::mapping::MappingDescriptor;

/// Compiles predicates against a mapping descriptor.
///
/// Compilation is a recursive descent over the tree, left operand first.
/// Property references become mapped column names, values become `@pN`
/// parameters numbered in the order they are reached, and every binary node
/// is parenthesized. Captured values are evaluated during the walk; nothing
/// is cached between calls.
#[derive(Debug, Clone, Copy)]
pub struct PredicateCompiler<'d> {
    descriptor: &'d MappingDescriptor,
}

/// A compiled subtree.
enum Fragment {
    /// A mapped column name.
    Column(String),
    /// A parameter by ordinal.
    Param(usize),
    /// Already-rendered SQL.
    Sql(String),
}

impl Fragment {
    fn render(self) -> String {
        match self {
            Fragment::Column(column) => column,
            Fragment::Param(ordinal) => placeholder(ordinal),
            Fragment::Sql(sql) => sql,
        }
    }
}

impl<'d> PredicateCompiler<'d> {
    /// Creates a compiler for a descriptor.
    pub fn new(descriptor: &'d MappingDescriptor) -> Self {
        Self { descriptor }
    }

    /// Compiles a predicate.
    pub fn compile(&self, predicate: &Predicate) -> RowStreamResult<WhereClause> {
        let mut parameters = Vec::new();
        let sql = self.visit(predicate, &mut parameters)?.render();
        Ok(WhereClause { sql, parameters })
    }

    fn visit(&self, node: &Predicate, parameters: &mut Vec<Parameter>) -> RowStreamResult<Fragment> {
        match node {
            Predicate::Column(property) => {
                let column = self.descriptor.column(property)?;
                Ok(Fragment::Column(column.to_string()))
            }
            Predicate::Value(source) => {
                let value = source.evaluate();
                let sql_type = SqlType::infer(&value)?;
                let ordinal = parameters.len();
                parameters.push(Parameter::new(ordinal, Some(sql_type), value));
                Ok(Fragment::Param(ordinal))
            }
            Predicate::Binary { op, left, right } => {
                let left = self.visit(left, parameters)?;
                let right = self.visit(right, parameters)?;
                match op {
                    BinaryOp::Eq => {
                        match (&left, &right) {
                            (Fragment::Column(column), Fragment::Param(ordinal))
                            | (Fragment::Param(ordinal), Fragment::Column(column)) => {
                                parameters[*ordinal].column = Some(column.clone());
                            }
                            _ => {}
                        }
                        Ok(Self::join(left, "=", right))
                    }
                    BinaryOp::And => Ok(Self::join(left, "AND", right)),
                    BinaryOp::Or => Ok(Self::join(left, "OR", right)),
                    other => Err(RowStreamError::unsupported_expression(format!(
                        "binary operator {} ({:?})",
                        other, other
                    ))),
                }
            }
            Predicate::Not(_) => Err(RowStreamError::unsupported_expression("NOT")),
        }
    }

    fn join(left: Fragment, op: &str, right: Fragment) -> Fragment {
        Fragment::Sql(format!("({} {} {})", left.render(), op, right.render()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{captured, col, lit};
    use indexmap::IndexMap;
    use rowstream_common::types::Value;
    use rowstream_common::ErrorCode;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    fn descriptor() -> MappingDescriptor {
        let columns: IndexMap<String, String> = [
            ("Id", "[Id]"),
            ("FileName", "[FileName]"),
            ("Owner", "[OwnerId]"),
            ("File", "[File]"),
        ]
        .into_iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect();
        MappingDescriptor::new("dbo.Files", columns, Some("Id".into()), "File").unwrap()
    }

    #[test]
    fn test_single_equality() {
        let d = descriptor();
        let clause = PredicateCompiler::new(&d).compile(&col("Id").eq(5)).unwrap();

        assert_eq!(clause.sql, "([Id] = @p0)");
        assert_eq!(clause.parameters.len(), 1);
        let p = &clause.parameters[0];
        assert_eq!(p.name, "@p0");
        assert_eq!(p.column.as_deref(), Some("[Id]"));
        assert_eq!(p.sql_type, Some(SqlType::Int));
        assert_eq!(p.value, Value::Int(5));
    }

    #[test]
    fn test_conjunction_numbering() {
        let d = descriptor();
        let owner = 42i64;
        let predicate = col("Id")
            .eq(5)
            .and(col("FileName").eq("a.pdf"))
            .or(lit(owner).eq(col("Owner")));
        let clause = PredicateCompiler::new(&d).compile(&predicate).unwrap();

        assert_eq!(
            clause.sql,
            "((([Id] = @p0) AND ([FileName] = @p1)) OR (@p2 = [OwnerId]))"
        );
        let names: Vec<_> = clause.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@p0", "@p1", "@p2"]);
        assert_eq!(clause.parameters[1].sql_type, Some(SqlType::NVarChar));
        assert_eq!(clause.parameters[2].column.as_deref(), Some("[OwnerId]"));
        assert_eq!(clause.parameters[2].sql_type, Some(SqlType::BigInt));
    }

    #[test]
    fn test_value_to_value_has_no_column() {
        let d = descriptor();
        let clause = PredicateCompiler::new(&d).compile(&lit(1).eq(lit(1))).unwrap();
        assert_eq!(clause.sql, "(@p0 = @p1)");
        assert!(clause.parameters.iter().all(|p| p.column.is_none()));
    }

    #[test]
    fn test_captured_evaluated_per_compile() {
        let d = descriptor();
        let counter = Arc::new(AtomicI64::new(0));
        let source = counter.clone();
        let predicate = col("Id").eq(captured(move || source.fetch_add(1, Ordering::SeqCst)));
        let compiler = PredicateCompiler::new(&d);

        assert_eq!(compiler.compile(&predicate).unwrap().parameters[0].value, Value::BigInt(0));
        assert_eq!(compiler.compile(&predicate).unwrap().parameters[0].value, Value::BigInt(1));
    }

    #[test]
    fn test_unmapped_property() {
        let d = descriptor();
        let err = PredicateCompiler::new(&d)
            .compile(&col("Id").eq(1).and(col("Size").eq(3)))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnmappedProperty);
        assert!(err.to_string().contains("Size"));
    }

    #[test]
    fn test_unsupported_operators() {
        let d = descriptor();
        let compiler = PredicateCompiler::new(&d);
        for predicate in [
            col("Id").ne(1),
            col("Id").lt(1),
            col("Id").le(1),
            col("Id").gt(1),
            col("Id").ge(1),
            col("Id").eq(1).negate(),
        ] {
            let err = compiler.compile(&predicate).unwrap_err();
            assert_eq!(err.code(), ErrorCode::UnsupportedExpression, "{}", predicate);
        }
    }

    #[test]
    fn test_untyped_values_rejected() {
        let d = descriptor();
        let compiler = PredicateCompiler::new(&d);
        let err = compiler.compile(&col("FileName").eq(Value::Null)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedType);
        let err = compiler.compile(&col("File").eq(vec![1u8, 2])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnsupportedType);
    }

    #[test]
    fn test_identity() {
        let d = descriptor();
        let clause = PredicateCompiler::new(&d)
            .compile(&Predicate::identity(&d, 9i64).unwrap())
            .unwrap();
        assert_eq!(clause.sql, "([Id] = @p0)");
        assert_eq!(clause.parameters[0].value, Value::BigInt(9));
    }
}
