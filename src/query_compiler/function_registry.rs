/// Scalar Function Registry
///
/// Maps member-style function names used in query lambdas (`c.City.ToUpper()`)
/// to their server-side SQL spelling. A call is only eligible to become a
/// server column when its function is registered here.
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub struct ServerFunction {
    /// Name as written in queries
    pub name: &'static str,
    /// SQL function name
    pub sql_name: &'static str,
    /// Accepted argument counts, receiver included
    pub arities: &'static [usize],
}

/// Get the server function for a query-side function name
pub fn get_server_function(name: &str) -> Option<ServerFunction> {
    SERVER_FUNCTIONS.get(name).cloned()
}

pub fn is_server_function(name: &str, arg_count: usize) -> bool {
    get_server_function(name)
        .map(|f| f.arities.contains(&arg_count))
        .unwrap_or(false)
}

lazy_static::lazy_static! {
    static ref SERVER_FUNCTIONS: HashMap<&'static str, ServerFunction> = {
        let mut m = HashMap::new();

        // ===== STRING FUNCTIONS =====
        m.insert("ToUpper", ServerFunction { name: "ToUpper", sql_name: "UPPER", arities: &[1] });
        m.insert("ToLower", ServerFunction { name: "ToLower", sql_name: "LOWER", arities: &[1] });
        m.insert("Trim", ServerFunction { name: "Trim", sql_name: "TRIM", arities: &[1] });
        m.insert("Length", ServerFunction { name: "Length", sql_name: "LEN", arities: &[1] });
        // Substring(s, start[, length]) is zero-based on the query side
        m.insert("Substring", ServerFunction { name: "Substring", sql_name: "SUBSTRING", arities: &[2, 3] });
        m.insert("StartsWith", ServerFunction { name: "StartsWith", sql_name: "LIKE", arities: &[2] });
        m.insert("EndsWith", ServerFunction { name: "EndsWith", sql_name: "LIKE", arities: &[2] });
        m.insert("Concat", ServerFunction { name: "Concat", sql_name: "CONCAT", arities: &[2, 3, 4] });

        // ===== NUMERIC FUNCTIONS =====
        m.insert("Abs", ServerFunction { name: "Abs", sql_name: "ABS", arities: &[1] });
        m.insert("Round", ServerFunction { name: "Round", sql_name: "ROUND", arities: &[1, 2] });
        m.insert("Floor", ServerFunction { name: "Floor", sql_name: "FLOOR", arities: &[1] });
        m.insert("Ceiling", ServerFunction { name: "Ceiling", sql_name: "CEILING", arities: &[1] });

        m
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_arity() {
        assert_eq!(get_server_function("ToUpper").map(|f| f.sql_name), Some("UPPER"));
        assert!(is_server_function("Substring", 3));
        assert!(!is_server_function("Substring", 1));
        assert!(!is_server_function("Format", 1));
    }
}
