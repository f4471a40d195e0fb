//! Question answering over an indexed product.
//!
//! Finds the product's newest indexed snapshot, retrieves the most similar
//! chunks and summaries, composes a grounded prompt that cites each source
//! by its chunk key, and asks the LLM.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::clients::LlmClient;
use crate::models::SourceSnapshot;
use crate::search::{SearchEngine, SearchHit};
use crate::store::Store;

/// Answer plus the retrieval hits it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<SearchHit>,
}

pub struct AskService {
    store: Arc<dyn Store>,
    llm: Arc<dyn LlmClient>,
    search: SearchEngine,
}

impl AskService {
    pub fn new(store: Arc<dyn Store>, llm: Arc<dyn LlmClient>, search: SearchEngine) -> Self {
        Self { store, llm, search }
    }

    pub async fn ask(&self, product_name: &str, question: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            bail!("question must not be empty");
        }
        let snapshot = self
            .latest_snapshot(product_name)
            .await
            .with_context(|| format!("resolving product '{product_name}'"))?;

        let hits = self.search.search(snapshot.id, question).await?;
        if hits.is_empty() {
            bail!("no indexed content matched the question");
        }

        let prompt = compose_prompt(question, &hits);
        let text = self.llm.generate_completion(&prompt).await?;
        Ok(Answer {
            text,
            sources: hits,
        })
    }

    /// Newest indexed snapshot across the product's sources.
    async fn latest_snapshot(&self, product_name: &str) -> Result<SourceSnapshot> {
        let product = self
            .store
            .get_product_by_name(product_name)
            .await?
            .with_context(|| format!("product '{product_name}' not found"))?;
        let sources = self.store.list_sources(product.id).await?;
        let mut newest: Option<SourceSnapshot> = None;
        for source in sources {
            if let Some(snapshot) = self.store.latest_indexed_snapshot(source.id).await? {
                let is_newer = newest
                    .as_ref()
                    .map(|n| snapshot.created_at > n.created_at)
                    .unwrap_or(true);
                if is_newer {
                    newest = Some(snapshot);
                }
            }
        }
        newest.with_context(|| format!("product '{product_name}' has no indexed snapshot"))
    }
}

fn compose_prompt(question: &str, hits: &[SearchHit]) -> String {
    let mut prompt = String::from(
        "Answer the question using only the source excerpts below. \
         Cite the excerpt references you relied on. If the excerpts do not \
         contain the answer, say so.\n\n",
    );
    for (i, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] {}\n{}\n\n",
            i + 1,
            hit.reference,
            hit.content
        ));
    }
    prompt.push_str(&format!("Question: {question}\n"));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_cites_references() {
        let hits = vec![
            SearchHit {
                kind: crate::search::HitKind::Chunk,
                reference: "prod/src/main.go#L1-L3:0@c1".to_string(),
                score: 0.9,
                snippet: "func Greet".to_string(),
                content: "func Greet(name string) string { return name }".to_string(),
            },
            SearchHit {
                kind: crate::search::HitKind::Summary,
                reference: "file:main.go".to_string(),
                score: 0.5,
                snippet: "entry point".to_string(),
                content: "The entry point of the service.".to_string(),
            },
        ];
        let prompt = compose_prompt("what does Greet do?", &hits);
        assert!(prompt.contains("[1] prod/src/main.go#L1-L3:0@c1"));
        assert!(prompt.contains("[2] file:main.go"));
        assert!(prompt.ends_with("Question: what does Greet do?\n"));
    }
}
