use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::errors::{BillingError, Result};
use crate::types::UnitId;

use super::{BinaryOp, Expr};

/// evaluate an expression against a variable scope; pure and deterministic
pub fn evaluate(expr: &Expr, scope: &BTreeMap<String, Decimal>, unit_id: UnitId) -> Result<Decimal> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Variable(name) => {
            scope
                .get(name)
                .copied()
                .ok_or_else(|| BillingError::FormulaResolution {
                    unit_id,
                    message: format!("unknown identifier: {name}"),
                })
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = evaluate(lhs, scope, unit_id)?;
            let rhs = evaluate(rhs, scope, unit_id)?;
            match op {
                BinaryOp::Add => Ok(lhs + rhs),
                BinaryOp::Sub => Ok(lhs - rhs),
                BinaryOp::Mul => Ok(lhs * rhs),
                BinaryOp::Div => {
                    if rhs.is_zero() {
                        return Err(BillingError::FormulaResolution {
                            unit_id,
                            message: "division by zero".to_string(),
                        });
                    }
                    Ok(lhs / rhs)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parser::parse;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn scope(pairs: &[(&str, Decimal)]) -> BTreeMap<String, Decimal> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_arithmetic() {
        let vars = scope(&[("budget", dec!(120000)), ("units", dec!(40))]);
        let expr = parse("budget / units + 50").unwrap();
        assert_eq!(evaluate(&expr, &vars, Uuid::new_v4()).unwrap(), dec!(3050));
    }

    #[test]
    fn test_unknown_identifier() {
        let expr = parse("missing * 2").unwrap();
        let err = evaluate(&expr, &BTreeMap::new(), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, BillingError::FormulaResolution { .. }));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_division_by_zero() {
        let vars = scope(&[("units", dec!(0))]);
        let expr = parse("100 / units").unwrap();
        assert!(matches!(
            evaluate(&expr, &vars, Uuid::new_v4()),
            Err(BillingError::FormulaResolution { .. })
        ));
    }

    #[test]
    fn test_decimal_exactness() {
        // 0.1 + 0.2 is exact in fixed point
        let expr = parse("0.1 + 0.2").unwrap();
        assert_eq!(
            evaluate(&expr, &BTreeMap::new(), Uuid::new_v4()).unwrap(),
            dec!(0.3)
        );
    }
}
