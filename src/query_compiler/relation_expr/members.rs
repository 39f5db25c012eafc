//! Member access over bound projector shapes.

use super::{
    ConditionalExpr, Expr, GroupingExpr, MemberAccess, OuterJoinedExpr, ProjectionExpr, Value,
};

/// Resolves `source.member` against a bound shape, pushing the access
/// through constructions and wrappers. Unresolvable accesses stay as a
/// [`MemberAccess`] so relationship navigation can pick them up later.
pub fn bind_member(source: &Expr, member: &str) -> Expr {
    match source {
        Expr::Entity(entity) => {
            let resolved = bind_member(&entity.expr, member);
            match &resolved {
                Expr::Member(m) if *m.expr == *entity.expr && m.member == member => unresolved(source, member),
                _ => resolved,
            }
        }
        Expr::New(new) => match new.member(member) {
            Some(expr) => expr.clone(),
            None => unresolved(source, member),
        },
        Expr::Projection(projection) => Expr::Projection(ProjectionExpr {
            select: projection.select.clone(),
            projector: Box::new(bind_member(&projection.projector, member)),
            aggregator: projection.aggregator,
        }),
        Expr::OuterJoined(outer) => {
            let resolved = bind_member(&outer.expr, member);
            match resolved {
                Expr::Column(_) => resolved,
                _ => Expr::OuterJoined(OuterJoinedExpr {
                    test: outer.test.clone(),
                    expr: Box::new(resolved),
                }),
            }
        }
        Expr::Conditional(cond) => Expr::Conditional(ConditionalExpr {
            test: cond.test.clone(),
            if_true: Box::new(bind_member(&cond.if_true, member)),
            if_false: Box::new(bind_member(&cond.if_false, member)),
        }),
        Expr::Grouping(GroupingExpr { key, .. }) if member == "Key" => (**key).clone(),
        Expr::Constant(Value::Null) => Expr::Constant(Value::Null),
        _ => unresolved(source, member),
    }
}

fn unresolved(source: &Expr, member: &str) -> Expr {
    Expr::Member(MemberAccess {
        expr: Box::new(source.clone()),
        member: member.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_compiler::alias::TableAlias;
    use crate::query_compiler::operator::builder::new_object;
    use crate::query_compiler::relation_expr::{EntityExpr, SqlType};

    #[test]
    fn test_member_of_new_resolves() {
        let a = TableAlias::new();
        let shape = new_object([("City", Expr::column(a, "City", SqlType::Text))]);
        assert_eq!(bind_member(&shape, "City"), Expr::column(a, "City", SqlType::Text));
    }

    #[test]
    fn test_unknown_member_of_entity_stays_member_access() {
        let a = TableAlias::new();
        let entity = Expr::Entity(EntityExpr {
            entity: "Customer".to_string(),
            expr: Box::new(new_object([("City", Expr::column(a, "City", SqlType::Text))])),
        });
        let bound = bind_member(&entity, "Orders");
        match bound {
            Expr::Member(m) => {
                assert_eq!(m.member, "Orders");
                assert!(matches!(*m.expr, Expr::Entity(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_outer_joined_column_unwraps() {
        let a = TableAlias::new();
        let wrapped = Expr::OuterJoined(OuterJoinedExpr {
            test: Box::new(Expr::column(a, "Test", SqlType::Int)),
            expr: Box::new(new_object([("Name", Expr::column(a, "Name", SqlType::Text))])),
        });
        assert_eq!(bind_member(&wrapped, "Name"), Expr::column(a, "Name", SqlType::Text));
    }
}
