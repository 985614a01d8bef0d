pub mod eval;
pub mod parser;

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{BillingError, Result};
use crate::types::{CondominiumId, CurrencyId, FormulaId, UnitId, UnitProfile};

pub use eval::evaluate;
pub use parser::parse;

/// binary operators supported in formula expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// parsed formula expression, built once at save time and evaluated deterministically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Decimal),
    Variable(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// computation rule for a charge amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FormulaKind {
    /// one amount for every unit
    Fixed { amount: Money },
    /// symbolic expression over named variables plus unit attributes
    Expression {
        expression: String,
        variables: BTreeMap<String, Decimal>,
    },
    /// explicit amount per unit id
    PerUnit { unit_amounts: BTreeMap<UnitId, Money> },
}

/// quota formula owned by a condominium; immutable once referenced by a generation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaFormula {
    pub id: FormulaId,
    pub condominium_id: CondominiumId,
    pub name: String,
    pub currency_id: CurrencyId,
    pub kind: FormulaKind,
    pub update_reason: Option<String>,
}

impl QuotaFormula {
    /// parse and freeze the formula for evaluation and snapshotting
    pub fn compile(&self) -> Result<FormulaSnapshot> {
        let compiled = match &self.kind {
            FormulaKind::Fixed { amount } => CompiledFormula::Fixed { amount: *amount },
            FormulaKind::Expression {
                expression,
                variables,
            } => CompiledFormula::Expression {
                ast: parse(expression)?,
                variables: variables.clone(),
            },
            FormulaKind::PerUnit { unit_amounts } => CompiledFormula::PerUnit {
                unit_amounts: unit_amounts.clone(),
            },
        };
        Ok(FormulaSnapshot {
            formula_id: self.id,
            currency_id: self.currency_id,
            compiled,
        })
    }
}

/// compiled form of a formula, independent of later edits to the live formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompiledFormula {
    Fixed {
        amount: Money,
    },
    Expression {
        ast: Expr,
        variables: BTreeMap<String, Decimal>,
    },
    PerUnit {
        unit_amounts: BTreeMap<UnitId, Money>,
    },
}

/// frozen copy of a compiled formula, persisted with each quota and generation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSnapshot {
    pub formula_id: FormulaId,
    pub currency_id: CurrencyId,
    pub compiled: CompiledFormula,
}

impl FormulaSnapshot {
    /// compute the charge amount for one unit; pure, no clock access
    pub fn amount_for(&self, unit: &UnitProfile) -> Result<Money> {
        let amount = match &self.compiled {
            CompiledFormula::Fixed { amount } => *amount,
            CompiledFormula::PerUnit { unit_amounts } => {
                *unit_amounts
                    .get(&unit.id)
                    .ok_or_else(|| BillingError::FormulaResolution {
                        unit_id: unit.id,
                        message: "no per-unit amount for this unit".to_string(),
                    })?
            }
            CompiledFormula::Expression { ast, variables } => {
                let mut scope = variables.clone();
                // unit attributes take precedence over formula variables
                scope.insert("aliquot".to_string(), unit.aliquot);
                scope.insert("area".to_string(), unit.area);
                Money::from_decimal(evaluate(ast, &scope, unit.id)?)
            }
        };
        if amount.is_negative() {
            return Err(BillingError::FormulaResolution {
                unit_id: unit.id,
                message: format!("formula produced a negative amount: {amount}"),
            });
        }
        Ok(amount)
    }
}
