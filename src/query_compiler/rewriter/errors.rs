use std::fmt::Display;

use thiserror::Error;

use crate::mapping::MappingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    AggregateRewriter,
    OrderByRewriter,
    RelationshipBinder,
    EntityComparison,
    SingletonProjection,
    ClientJoin,
    CrossJoinIsolator,
    CrossApplyRewriter,
    RedundantJoinRemover,
    RedundantSubqueryRemover,
    UnusedColumnRemover,
    RedundantColumnRemover,
    SkipTakeToTop,
    SkipToRowNumber,
}

impl Display for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pass::AggregateRewriter => write!(f, "AggregateRewriter"),
            Pass::OrderByRewriter => write!(f, "OrderByRewriter"),
            Pass::RelationshipBinder => write!(f, "RelationshipBinder"),
            Pass::EntityComparison => write!(f, "EntityComparison"),
            Pass::SingletonProjection => write!(f, "SingletonProjection"),
            Pass::ClientJoin => write!(f, "ClientJoin"),
            Pass::CrossJoinIsolator => write!(f, "CrossJoinIsolator"),
            Pass::CrossApplyRewriter => write!(f, "CrossApplyRewriter"),
            Pass::RedundantJoinRemover => write!(f, "RedundantJoinRemover"),
            Pass::RedundantSubqueryRemover => write!(f, "RedundantSubqueryRemover"),
            Pass::UnusedColumnRemover => write!(f, "UnusedColumnRemover"),
            Pass::RedundantColumnRemover => write!(f, "RedundantColumnRemover"),
            Pass::SkipTakeToTop => write!(f, "SkipTakeToTop"),
            Pass::SkipToRowNumber => write!(f, "SkipToRowNumber"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RewriterError {
    #[error("{pass}: cannot compare constructed types with members [{left}] and [{right}]")]
    IncomparableConstructedTypes {
        pass: Pass,
        left: String,
        right: String,
    },

    #[error("MappingError: {pass}: {source}.")]
    Mapping {
        pass: Pass,
        #[source]
        source: MappingError,
    },

    #[error("{pass}: {message}")]
    InvalidTree { pass: Pass, message: String },
}
