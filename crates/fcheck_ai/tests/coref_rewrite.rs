use fcheck_ai::coref::{CorefCluster, CorefModel, CorefResolver, Mention};
use fcheck_ai::pipeline::{coref_pipeline, Payload};
use fcheck_core::domain::{Device, SentenceProposal};
use fcheck_core::error::AppError;
use pretty_assertions::assert_eq;

/// One cluster over every occurrence of the listed surface forms.
struct LexicalCoref {
    forms: Vec<&'static str>,
}

impl CorefModel for LexicalCoref {
    fn predict(&self, text: &str) -> Result<Vec<CorefCluster>, AppError> {
        let mut mentions: Vec<Mention> = self
            .forms
            .iter()
            .flat_map(|f| {
                text.match_indices(f)
                    .map(|(i, m)| Mention::new(m, i, i + m.len()))
                    .collect::<Vec<_>>()
            })
            .collect();
        mentions.sort_by_key(|m| m.start);
        if mentions.len() < 2 {
            return Ok(Vec::new());
        }
        Ok(vec![CorefCluster::new(mentions)])
    }
}

fn joined(sentences: &[SentenceProposal]) -> String {
    sentences
        .iter()
        .map(|s| s.text().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn pronoun_is_rewritten_to_its_antecedent() {
    let resolver = CorefResolver::new(LexicalCoref {
        forms: vec!["Angela", "She"],
    });
    let text = "Angela went to the park. She saw her friend.";
    let sentences = resolver.resolve(text).expect("resolve");

    assert_eq!(sentences.len(), 2);
    assert_eq!(sentences[0].text(), "Angela went to the park.");
    assert_eq!(sentences[1].text(), "Angela saw her friend.");
    assert_eq!(sentences[1].index(), 1);

    // The rewritten token still points at "She" in the input.
    let first = &sentences[1].tokens()[0];
    assert_eq!(&text[first.start..first.end], "She");
    assert_eq!(sentences[1].span(), Some((25, 44)));
}

#[test]
fn resolving_resolved_text_changes_nothing() {
    let resolver = CorefResolver::new(LexicalCoref {
        forms: vec!["Angela", "She"],
    });
    let once = joined(&resolver.resolve("Angela went to the park. She saw her friend.").expect("first"));
    let twice = joined(&resolver.resolve(&once).expect("second"));
    assert_eq!(twice, once);

    let flat = resolver.resolve_flat(&once).expect("flat");
    assert_eq!(flat.text, once);
}

#[test]
fn resolver_runs_as_a_pipeline_step() {
    let resolver = CorefResolver::new(LexicalCoref {
        forms: vec!["Angela", "She"],
    });
    let pipeline = coref_pipeline(resolver, Device::Cpu);
    assert_eq!(pipeline.names(), vec!["coref"]);

    match pipeline
        .run(Payload::from("Angela went to the park. She saw her friend."))
        .expect("run")
    {
        Payload::Sentences(sentences) => {
            assert_eq!(joined(&sentences), "Angela went to the park. Angela saw her friend.");
        }
        other => panic!("unexpected payload: {}", other.kind()),
    }

    let err = pipeline
        .run(Payload::Segments(vec!["x".into()]))
        .unwrap_err();
    assert_eq!(err.code, fcheck_core::error::codes::PIPELINE_TYPE_MISMATCH);
}
