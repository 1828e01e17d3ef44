//! Core error types.

use thiserror::Error;

use crate::dataflow::NodeId;

/// Engine errors.
///
/// Query-construction errors are raised synchronously while compiling a
/// query and are never retried; the remaining variants report misuse of the
/// runtime API.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ivmdb_proto::Error),

    /// A join condition side references no source alias.
    #[error("Invalid join condition: expressions must reference source aliases")]
    JoinConditionWithoutSource,

    /// Both sides of a join condition reference the same alias.
    #[error("Invalid join condition: both expressions refer to the same source \"{alias}\"")]
    JoinConditionSameSource {
        /// The alias referenced by both sides.
        alias: String,
    },

    /// The left side of a join condition references an alias that is not
    /// introduced before the join.
    #[error(
        "Invalid join condition: left expression refers to an unavailable source \"{alias}\""
    )]
    JoinConditionLeftSource {
        /// The unavailable alias.
        alias: String,
    },

    /// The right side of a join condition does not reference the joined alias.
    #[error(
        "Invalid join condition: right expression does not refer to the joined source \"{alias}\""
    )]
    JoinConditionRightSource {
        /// The alias the join introduces.
        alias: String,
    },

    /// LIMIT or OFFSET used without ORDER BY.
    #[error("LIMIT and OFFSET require an ORDER BY clause to ensure deterministic results")]
    LimitOffsetRequireOrderBy,

    /// DISTINCT used without SELECT.
    #[error("DISTINCT requires a SELECT clause")]
    DistinctRequiresSelect,

    /// A non-aggregate SELECT field does not appear in GROUP BY.
    #[error("non-aggregate expression '{alias}' in SELECT must also appear in GROUP BY")]
    NonAggregateNotInGroupBy {
        /// The offending SELECT field.
        alias: String,
    },

    /// A HAVING aggregate has no matching SELECT aggregate.
    #[error("aggregate function '{name}' in HAVING must also appear in SELECT")]
    AggregateNotInSelect {
        /// The aggregate name.
        name: String,
    },

    /// Aggregate name not recognized.
    #[error("unsupported aggregate function: {name}")]
    UnsupportedAggregate {
        /// The aggregate name.
        name: String,
    },

    /// Function name not recognized.
    #[error("unsupported function: {name}")]
    UnsupportedFunction {
        /// The function name.
        name: String,
    },

    /// An aggregate appears where only row expressions are allowed.
    #[error("aggregate '{name}' is not allowed outside SELECT and HAVING")]
    MisplacedAggregate {
        /// The aggregate name.
        name: String,
    },

    /// A change names a collection the query does not read.
    #[error("unknown collection: {name}")]
    UnknownCollection {
        /// The collection name.
        name: String,
    },

    /// Two sources of one query level share an alias.
    #[error("duplicate source alias \"{alias}\"")]
    DuplicateSourceAlias {
        /// The reused alias.
        alias: String,
    },

    /// A property reference names an alias the query level does not
    /// introduce.
    #[error("reference to unknown source alias \"{alias}\"")]
    UnknownSourceAlias {
        /// The unknown alias.
        alias: String,
    },

    /// Window retargeting on a query without ORDER BY.
    #[error("window changes require an ORDER BY clause")]
    WindowRequiresOrderBy,

    /// An unrecognized expression node reached the compiler.
    #[error("cannot compile unknown expression node")]
    UnknownExpression,

    /// Graph wiring error.
    #[error("graph error: {0}")]
    Graph(String),

    /// Node id does not belong to the graph.
    #[error("unknown graph node {0:?}")]
    UnknownNode(NodeId),

    /// Fractional index generation received keys out of order.
    #[error("invalid fractional index bounds: {0}")]
    FractionalIndex(String),

    /// `begin` called inside an open transaction.
    #[error("a transaction is already open")]
    TransactionOpen,

    /// `commit` called with no open transaction.
    #[error("no transaction is open")]
    NoTransaction,

    /// Subscription id not registered.
    #[error("subscription {0} not found")]
    SubscriptionNotFound(u64),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
