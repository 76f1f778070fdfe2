//! Named callables registered from scripts
//!
//! A recipe is either a SQL template with `{param}` placeholders or a Lua
//! function. Invoking one may also request column transforms for the
//! statement it produces.

use std::collections::BTreeMap;

use mlua::Function;

use crate::command::BangMap;
use crate::error::{ShellError, ShellResult};
use crate::results::ResultSet;

/// Recipes provided by the shell itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Version,
    List,
    LastCmd,
    Reload,
}

impl Builtin {
    pub const ALL: [Builtin; 4] = [
        Builtin::Version,
        Builtin::List,
        Builtin::LastCmd,
        Builtin::Reload,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Version => "version",
            Builtin::List => "list",
            Builtin::LastCmd => "last_cmd",
            Builtin::Reload => "reload",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Builtin::Version => "Version information for rsql and the connection.",
            Builtin::List => "List all registered recipes.",
            Builtin::LastCmd => "Print the last command generated.",
            Builtin::Reload => "Reload every file loaded so far.",
        }
    }
}

#[derive(Debug, Clone)]
pub enum RecipeBody {
    Sql {
        template: String,
        params: Vec<String>,
    },
    Lua(Function),
    Builtin(Builtin),
}

#[derive(Debug, Clone)]
pub struct Recipe {
    pub name: String,
    pub usage: String,
    pub description: String,
    pub bangs: BangMap,
    /// Run once when the connection is ready
    pub init: bool,
    pub body: RecipeBody,
}

impl Recipe {
    /// Whitespace is collapsed and a trailing `;` added
    pub fn sql(name: &str, template: &str, params: Vec<String>) -> Self {
        let mut template = template.split_whitespace().collect::<Vec<_>>().join(" ");
        if !template.ends_with(';') {
            template.push(';');
        }
        Self {
            name: name.to_string(),
            usage: usage_for(name, &params),
            description: String::new(),
            bangs: BangMap::new(),
            init: false,
            body: RecipeBody::Sql { template, params },
        }
    }

    pub fn function(name: &str, function: Function, params: &[String]) -> Self {
        Self {
            name: name.to_string(),
            usage: usage_for(name, params),
            description: String::new(),
            bangs: BangMap::new(),
            init: false,
            body: RecipeBody::Lua(function),
        }
    }

    fn builtin(builtin: Builtin) -> Self {
        Self {
            name: builtin.name().to_string(),
            usage: builtin.name().to_string(),
            description: builtin.description().to_string(),
            bangs: BangMap::new(),
            init: false,
            body: RecipeBody::Builtin(builtin),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_bangs(mut self, bangs: BangMap) -> Self {
        self.bangs = bangs;
        self
    }

    pub fn run_at_init(mut self) -> Self {
        self.init = true;
        self
    }

    /// Fill a SQL template's placeholders with `args`, in parameter order
    pub fn render(&self, args: &[String]) -> ShellResult<Option<String>> {
        let RecipeBody::Sql { template, params } = &self.body else {
            return Ok(None);
        };
        if args.len() != params.len() {
            return Err(ShellError::evaluation(format!(
                "wrong number of arguments for {} (given {}, expected {})",
                self.name,
                args.len(),
                params.len()
            )));
        }

        let mut sql = template.clone();
        for (param, arg) in params.iter().zip(args) {
            sql = sql.replace(&format!("{{{}}}", param), arg);
        }
        Ok(Some(sql))
    }
}

fn usage_for(name: &str, params: &[String]) -> String {
    if params.is_empty() {
        name.to_string()
    } else {
        format!("{}({})", name, params.join(","))
    }
}

#[derive(Debug, Clone)]
pub struct RecipeBook {
    recipes: BTreeMap<String, Recipe>,
}

impl Default for RecipeBook {
    fn default() -> Self {
        let recipes = Builtin::ALL
            .iter()
            .map(|b| (b.name().to_string(), Recipe::builtin(*b)))
            .collect();
        Self { recipes }
    }
}

impl RecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a recipe
    pub fn register(&mut self, recipe: Recipe) {
        tracing::debug!(name = %recipe.name, usage = %recipe.usage, "registered recipe");
        self.recipes.insert(recipe.name.clone(), recipe);
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.recipes.keys().cloned().collect()
    }

    pub fn init_recipes(&self) -> Vec<Recipe> {
        self.recipes.values().filter(|r| r.init).cloned().collect()
    }

    /// `usage` and `description` of every recipe, sorted by usage
    pub fn listing(&self) -> ResultSet {
        let mut rows: Vec<Vec<String>> = self
            .recipes
            .values()
            .map(|r| vec![r.usage.clone(), r.description.clone()])
            .collect();
        rows.sort();
        ResultSet::new(
            "list",
            vec!["usage".to_string(), "description".to_string()],
            rows,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::TransformRef;

    #[test]
    fn test_sql_template_normalized() {
        let recipe = Recipe::sql(
            "users",
            "select *\n   from users\n where id = {id}",
            vec!["id".to_string()],
        );
        assert_eq!(recipe.usage, "users(id)");
        assert_eq!(
            recipe.render(&["7".to_string()]).unwrap().as_deref(),
            Some("select * from users where id = 7;")
        );
        assert!(recipe.render(&[]).is_err());
    }

    #[test]
    fn test_placeholders_substitute_positionally() {
        let recipe = Recipe::sql(
            "between",
            "select * from t where a > {lo} and a < {hi};",
            vec!["lo".to_string(), "hi".to_string()],
        );
        let sql = recipe
            .render(&["1".to_string(), "9".to_string()])
            .unwrap()
            .unwrap();
        assert_eq!(sql, "select * from t where a > 1 and a < 9;");
    }

    #[test]
    fn test_book_has_builtins() {
        let book = RecipeBook::new();
        for builtin in Builtin::ALL {
            assert!(book.contains(builtin.name()));
        }
        assert!(book.init_recipes().is_empty());
    }

    #[test]
    fn test_listing() {
        let mut book = RecipeBook::new();
        let mut bangs = BangMap::new();
        bangs.insert("size".to_string(), TransformRef::new("humanize_bytes"));
        book.register(
            Recipe::sql("sizes", "select size from t", Vec::new())
                .with_description("Table sizes.")
                .with_bangs(bangs),
        );

        let listing = book.listing();
        let names: Vec<&str> = listing.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["usage", "description"]);
        let rows = listing.rows().unwrap();
        assert!(rows.iter().any(|r| r[0] == "sizes" && r[1] == "Table sizes."));
        assert_eq!(rows.len(), Builtin::ALL.len() + 1);
    }
}
