use crate::error::{FormulaError, FormulaResult};

/// Builtin functions. Names are matched case-insensitively.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Function {
    // Aggregates range over every row of the current partition.
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Count,
    DistinctCount,
    Ratio,
    // Scalars are evaluated per row.
    If,
    Abs,
    Round,
    IsNull,
    Coalesce,
    Year,
    Month,
    Day,
}

impl Function {
    pub fn lookup(name: &str) -> Option<Function> {
        let f = match name.to_ascii_lowercase().as_str() {
            "sum" => Function::Sum,
            "mean" | "average" | "avg" => Function::Mean,
            "median" => Function::Median,
            "min" => Function::Min,
            "max" => Function::Max,
            "count" => Function::Count,
            "distinctcount" => Function::DistinctCount,
            "ratio" => Function::Ratio,
            "if" => Function::If,
            "abs" => Function::Abs,
            "round" => Function::Round,
            "isnull" => Function::IsNull,
            "coalesce" => Function::Coalesce,
            "year" => Function::Year,
            "month" => Function::Month,
            "day" => Function::Day,
            _ => return None,
        };
        Some(f)
    }

    pub fn name(self) -> &'static str {
        match self {
            Function::Sum => "sum",
            Function::Mean => "mean",
            Function::Median => "median",
            Function::Min => "min",
            Function::Max => "max",
            Function::Count => "count",
            Function::DistinctCount => "distinctcount",
            Function::Ratio => "ratio",
            Function::If => "if",
            Function::Abs => "abs",
            Function::Round => "round",
            Function::IsNull => "isnull",
            Function::Coalesce => "coalesce",
            Function::Year => "year",
            Function::Month => "month",
            Function::Day => "day",
        }
    }

    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            Function::Sum
                | Function::Mean
                | Function::Median
                | Function::Min
                | Function::Max
                | Function::Count
                | Function::DistinctCount
                | Function::Ratio
        )
    }

    pub(crate) fn check_arity(self, actual: usize) -> FormulaResult<()> {
        let (min, max, expected) = match self {
            Function::Count => (0, Some(1), "0 or 1"),
            Function::Ratio => (2, Some(2), "2"),
            Function::If => (2, Some(3), "2 or 3"),
            Function::Round => (1, Some(2), "1 or 2"),
            Function::Coalesce => (1, None, "at least 1"),
            _ => (1, Some(1), "1"),
        };
        if actual < min || max.is_some_and(|max| actual > max) {
            return Err(FormulaError::Arity {
                function: self.name(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}
