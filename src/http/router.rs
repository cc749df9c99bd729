use regex::Regex;

type ParamsConverter<R> = Fn(Vec<&str>) -> Option<R> + Send + Sync;

/// Maps request paths to routes. Routes are tried in the order they were added.
pub struct RouteParser<R> {
    routes: Vec<(Regex, Box<ParamsConverter<R>>)>,
}

impl<R> Default for RouteParser<R> {
    fn default() -> Self {
        Self { routes: Vec::new() }
    }
}

impl<R> RouteParser<R> {
    /// Adds a route without params
    pub fn add_route<F>(&mut self, pattern: &str, f: F)
    where
        F: Fn() -> R + Send + Sync + 'static,
    {
        self.add_route_with_params(pattern, move |_| Some(f()));
    }

    /// Adds a route whose capture groups are handed to `converter`. A converter returning
    /// `None` makes the path unmatched by this route.
    pub fn add_route_with_params<F>(&mut self, pattern: &str, converter: F)
    where
        F: Fn(Vec<&str>) -> Option<R> + Send + Sync + 'static,
    {
        match Regex::new(pattern) {
            Ok(regex) => self.routes.push((regex, Box::new(converter))),
            Err(e) => error!("Skipping route with invalid pattern {}: {}", pattern, e),
        }
    }

    pub fn test(&self, path: &str) -> Option<R> {
        self.routes.iter().filter_map(|(regex, converter)| {
            regex.captures(path).and_then(|captures| {
                let params = captures
                    .iter()
                    .skip(1)
                    .filter_map(|capture| capture.map(|m| m.as_str()))
                    .collect::<Vec<_>>();
                converter(params)
            })
        })
        .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Route {
        Items,
        Item { id: i32 },
        Pair { kind: String, id: i32 },
    }

    fn parser() -> RouteParser<Route> {
        let mut parser = RouteParser::default();
        parser.add_route(r"^/items$", || Route::Items);
        parser.add_route_with_params(r"^/items/(\d+)$", |params| {
            params.get(0).and_then(|id| id.parse().ok()).map(|id| Route::Item { id })
        });
        parser.add_route_with_params(r"^/pairs/(\w+)/(\d+)$", |params| match (params.get(0), params.get(1)) {
            (Some(kind), Some(id)) => id.parse().ok().map(|id| Route::Pair { kind: kind.to_string(), id }),
            _ => None,
        });
        parser
    }

    #[test]
    fn matches_routes_with_and_without_params() {
        let parser = parser();
        assert_eq!(parser.test("/items"), Some(Route::Items));
        assert_eq!(parser.test("/items/42"), Some(Route::Item { id: 42 }));
        assert_eq!(
            parser.test("/pairs/user/7"),
            Some(Route::Pair {
                kind: "user".to_string(),
                id: 7
            })
        );
    }

    #[test]
    fn rejects_unknown_paths_and_bad_params() {
        let parser = parser();
        assert_eq!(parser.test("/items/abc"), None);
        assert_eq!(parser.test("/items/99999999999"), None);
        assert_eq!(parser.test("/unknown"), None);
    }
}
