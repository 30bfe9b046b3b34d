//! Prompt templates for the pipeline stages
//!
//! Templates use Handlebars syntax and are rendered with serde data.

use handlebars::Handlebars;
use serde::Serialize;

use crate::error::{Error, Result};

/// A prompt template using Handlebars syntax
pub struct PromptTemplate {
    /// Template name
    name: String,
    /// Handlebars registry
    registry: Handlebars<'static>,
}

impl PromptTemplate {
    /// Create a new prompt template
    pub fn new(name: impl Into<String>, template: &str) -> Result<Self> {
        let name = name.into();
        let mut registry = Handlebars::new();

        registry
            .register_template_string(&name, template)
            .map_err(|e| Error::Internal(format!("Invalid template: {}", e)))?;

        Ok(PromptTemplate { name, registry })
    }

    /// Render the template with given data
    pub fn render<T: Serialize>(&self, data: &T) -> Result<String> {
        self.registry
            .render(&self.name, data)
            .map_err(|e| Error::Internal(format!("Template render error: {}", e)))
    }
}

/// System prompt for the discover-and-generate stage
pub const GENERATE_SYSTEM_PROMPT: &str = r#"You are a senior data analyst answering questions about a business database.

You have these tools:
- `search_knowledge_base`: look up business definitions and domain terminology
- `list_tables`: list the tables available in the tenant's database
- `describe_table`: inspect the columns of one table
- `check_relevance`: report that the question cannot be answered from this database

Procedure:
1. If the question is off-topic for a business database (weather, chit-chat,
   general knowledge), call `check_relevance` with `is_relevant` set to false
   and a short reason. Do nothing else.
2. Otherwise, discover the available tables, inspect the ones you need, and
   consult the knowledge base for any business terms in the question.
3. Finish with a SINGLE read-only SQL statement (SELECT only) inside a fenced
   ```sql code block. Never modify data. Never emit more than one statement.
"#;

/// User prompt for the discover-and-generate stage
const GENERATE_USER_PROMPT: &str = r#"Question: {{question}}
{{#if failed_sql}}

Your previous attempt failed. The statement:

```sql
{{failed_sql}}
```

produced this database error:

{{db_error}}

Correct the statement. Re-check the table and column names with your tools if
you are unsure.
{{/if}}"#;

/// System prompt for the formatting stage
pub const FORMAT_SYSTEM_PROMPT: &str = r#"You are a business analyst writing for an executive audience.
Summarise query results into clear, plain language. Mention concrete figures.
Keep the summary under 2000 characters. Do not include SQL or raw tables.
"#;

/// User prompt for the formatting stage
const FORMAT_USER_PROMPT: &str = r#"Question: {{question}}

SQL used:

```sql
{{sql}}
```

Results:

{{results}}

Write an executive summary of these results."#;

/// System prompt for the retrieval-only answer path
pub const RETRIEVAL_SYSTEM_PROMPT: &str = r#"Answer the question using ONLY the provided context passages.
If the context does not contain the answer, say so plainly.
"#;

/// User prompt for the retrieval-only answer path
const RETRIEVAL_USER_PROMPT: &str = r#"Question: {{question}}

Context:
{{#each context}}
---
{{this}}
{{/each}}"#;

/// Data for the generate-stage prompt
#[derive(Serialize)]
struct GenerateData<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_sql: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    db_error: Option<&'a str>,
}

/// Reflection context injected when stage 2 sends the saga back to stage 1
pub struct Reflection<'a> {
    /// The SQL that failed
    pub failed_sql: &'a str,
    /// The database error text
    pub db_error: &'a str,
}

/// Render the generate-stage user prompt, with an optional reflection block
pub fn render_generate_prompt(question: &str, reflection: Option<Reflection<'_>>) -> Result<String> {
    let template = PromptTemplate::new("generate", GENERATE_USER_PROMPT)?;
    template.render(&GenerateData {
        question,
        failed_sql: reflection.as_ref().map(|r| r.failed_sql),
        db_error: reflection.as_ref().map(|r| r.db_error),
    })
}

/// Render the format-stage user prompt
pub fn render_format_prompt(question: &str, sql: &str, results: &str) -> Result<String> {
    #[derive(Serialize)]
    struct Data<'a> {
        question: &'a str,
        sql: &'a str,
        results: &'a str,
    }

    let template = PromptTemplate::new("format", FORMAT_USER_PROMPT)?;
    template.render(&Data {
        question,
        sql,
        results,
    })
}

/// Render the retrieval-answer user prompt
pub fn render_retrieval_prompt(question: &str, context: &[String]) -> Result<String> {
    #[derive(Serialize)]
    struct Data<'a> {
        question: &'a str,
        context: &'a [String],
    }

    let template = PromptTemplate::new("retrieval", RETRIEVAL_USER_PROMPT)?;
    template.render(&Data { question, context })
}
