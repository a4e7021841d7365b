//! Filter types for flexible querying
//!
//! Operators follow the wire vocabulary clients already speak:
//! - eq, ne (equals, not equals)
//! - lt, lte, gt, gte (comparisons)
//! - contains, startswith, endswith and their negations (case-insensitive)
//! - containss, startswiths, endswiths and their negations (case-sensitive)
//! - in, nin (list membership)
//! - between, nbetween (inclusive range)
//! - null, nnull (null checks)
//!
//! A filter's value shape is fixed by its operator, so a filter that exists is
//! always well formed.

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
    Contains,
    NotContains,
    ContainsCaseSensitive,
    NotContainsCaseSensitive,
    StartsWith,
    NotStartsWith,
    StartsWithCaseSensitive,
    NotStartsWithCaseSensitive,
    EndsWith,
    NotEndsWith,
    EndsWithCaseSensitive,
    NotEndsWithCaseSensitive,
    IsNull,
    IsNotNull,
    Between,
    NotBetween,
}

impl FilterOperator {
    pub const ALL: [FilterOperator; 24] = [
        FilterOperator::Eq,
        FilterOperator::Ne,
        FilterOperator::Lt,
        FilterOperator::Lte,
        FilterOperator::Gt,
        FilterOperator::Gte,
        FilterOperator::In,
        FilterOperator::NotIn,
        FilterOperator::Contains,
        FilterOperator::NotContains,
        FilterOperator::ContainsCaseSensitive,
        FilterOperator::NotContainsCaseSensitive,
        FilterOperator::StartsWith,
        FilterOperator::NotStartsWith,
        FilterOperator::StartsWithCaseSensitive,
        FilterOperator::NotStartsWithCaseSensitive,
        FilterOperator::EndsWith,
        FilterOperator::NotEndsWith,
        FilterOperator::EndsWithCaseSensitive,
        FilterOperator::NotEndsWithCaseSensitive,
        FilterOperator::IsNull,
        FilterOperator::IsNotNull,
        FilterOperator::Between,
        FilterOperator::NotBetween,
    ];

    /// Wire token
    pub fn token(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "nin",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "ncontains",
            FilterOperator::ContainsCaseSensitive => "containss",
            FilterOperator::NotContainsCaseSensitive => "ncontainss",
            FilterOperator::StartsWith => "startswith",
            FilterOperator::NotStartsWith => "nstartswith",
            FilterOperator::StartsWithCaseSensitive => "startswiths",
            FilterOperator::NotStartsWithCaseSensitive => "nstartswiths",
            FilterOperator::EndsWith => "endswith",
            FilterOperator::NotEndsWith => "nendswith",
            FilterOperator::EndsWithCaseSensitive => "endswiths",
            FilterOperator::NotEndsWithCaseSensitive => "nendswiths",
            FilterOperator::IsNull => "null",
            FilterOperator::IsNotNull => "nnull",
            FilterOperator::Between => "between",
            FilterOperator::NotBetween => "nbetween",
        }
    }

    /// Parse a wire token (case-insensitive). Unknown tokens yield `None`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|op| op.token() == token)
    }

    /// Parse a wire token, falling back to `Eq` for unknown tokens.
    pub fn parse_or_eq(token: &str) -> Self {
        Self::parse(token).unwrap_or(FilterOperator::Eq)
    }

    /// Shape the operator expects its value in.
    pub fn value_shape(&self) -> ValueShape {
        match self {
            FilterOperator::In | FilterOperator::NotIn => ValueShape::List,
            FilterOperator::Between | FilterOperator::NotBetween => ValueShape::Range,
            FilterOperator::IsNull | FilterOperator::IsNotNull => ValueShape::Flag,
            _ => ValueShape::Scalar,
        }
    }
}

impl std::fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Value shape required by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Scalar,
    List,
    Range,
    Flag,
}

/// Filter operand, shaped by the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    /// Single literal; commas are not split
    Scalar(String),
    /// Comma-separated members for in/nin
    List(Vec<String>),
    /// Inclusive bounds for between/nbetween
    Range(String, String),
    /// Null-check polarity
    Flag(bool),
}

impl FilterValue {
    /// Coerce a raw wire value into the shape `operator` expects.
    ///
    /// Returns `None` when the value cannot take that shape: an empty list,
    /// a range without exactly two bounds, or a non-boolean null-check value.
    pub fn parse(operator: FilterOperator, raw: &str) -> Option<Self> {
        match operator.value_shape() {
            ValueShape::Scalar => Some(FilterValue::Scalar(raw.to_string())),
            ValueShape::List => {
                let items: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                (!items.is_empty()).then_some(FilterValue::List(items))
            }
            ValueShape::Range => {
                let bounds: Vec<&str> = raw.split(',').map(str::trim).collect();
                match bounds.as_slice() {
                    [low, high] if !low.is_empty() && !high.is_empty() => {
                        Some(FilterValue::Range(low.to_string(), high.to_string()))
                    }
                    _ => None,
                }
            }
            ValueShape::Flag => match raw.trim().to_ascii_lowercase().as_str() {
                "" | "true" | "1" | "yes" => Some(FilterValue::Flag(true)),
                "false" | "0" | "no" => Some(FilterValue::Flag(false)),
                _ => None,
            },
        }
    }

    pub fn shape(&self) -> ValueShape {
        match self {
            FilterValue::Scalar(_) => ValueShape::Scalar,
            FilterValue::List(_) => ValueShape::List,
            FilterValue::Range(_, _) => ValueShape::Range,
            FilterValue::Flag(_) => ValueShape::Flag,
        }
    }
}

/// A single `field <operator> value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    field: String,
    operator: FilterOperator,
    value: FilterValue,
}

impl Filter {
    /// Build a filter from a raw wire value; `None` if the value does not fit the operator.
    pub fn parse(field: impl Into<String>, operator: FilterOperator, raw: &str) -> Option<Self> {
        FilterValue::parse(operator, raw).map(|value| Self {
            field: field.into(),
            operator,
            value,
        })
    }

    /// Build a filter from an already shaped value; `None` on a shape mismatch.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Option<Self> {
        (operator.value_shape() == value.shape()).then(|| Self {
            field: field.into(),
            operator,
            value,
        })
    }

    /// Equality filter
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::Eq,
            value: FilterValue::Scalar(value.into()),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> FilterOperator {
        self.operator
    }

    pub fn value(&self) -> &FilterValue {
        &self.value
    }
}
