use crate::config::{ConversationConfig, Language};
use crate::models::{
    Citation, ConversationTurn, NoContextReason, PromptPayload, RetrievedPassage, Role,
};
use std::collections::VecDeque;

struct Phrasebook {
    system: &'static str,
    preamble: &'static str,
    documents_heading: &'static str,
    question_heading: &'static str,
    instructions_heading: &'static str,
    instructions: &'static [&'static str],
    answer_heading: &'static str,
    document_label: &'static str,
    source_label: &'static str,
    page_label: &'static str,
    unknown_source: &'static str,
    empty_index: &'static str,
    below_threshold: &'static str,
}

static SWEDISH: Phrasebook = Phrasebook {
    system: "Du är en svensk HR-assistent. Svara alltid på svenska, oavsett vilket språk frågan ställs på. Svara endast utifrån de bifogade policydokumenten och ange källa och sida för varje påstående.",
    preamble: "Du är en hjälpsam HR-assistent. Svara på medarbetarens fråga baserat på de tillhandahållna HR-policydokumenten.",
    documents_heading: "POLICYDOKUMENT:",
    question_heading: "MEDARBETARENS FRÅGA:",
    instructions_heading: "INSTRUKTIONER:",
    instructions: &[
        "Svara ENDAST baserat på informationen i de tillhandahållna policydokumenten",
        "Om dokumenten inte innehåller den information som behövs, säg tydligt: \"Jag har ingen information om detta i de tillgängliga HR-policyerna\"",
        "Var specifik och referera till vilket dokument/sida du hänvisar till, t.ex. [Dokument 1]",
        "Använd en vänlig, professionell ton",
        "Om policyer är oklara eller kan tolkas på flera sätt, nämn detta",
        "Håll svaren koncisa men fullständiga",
        "Hitta inte på eller anta information som inte finns i dokumenten",
        "Svara alltid på SVENSKA",
    ],
    answer_heading: "SVAR:",
    document_label: "Dokument",
    source_label: "Källa",
    page_label: "Sida",
    unknown_source: "Okänd",
    empty_index: "Jag har inga relevanta policydokument för att svara på denna fråga. Vänligen ladda upp HR-policydokument för att komma igång.",
    below_threshold: "Jag kunde inte hitta relevant information i de uppladdade policyerna för att svara på denna fråga. Frågan kan ligga utanför de tillgängliga dokumentens omfattning.",
};

static ENGLISH: Phrasebook = Phrasebook {
    system: "You are an HR assistant. Always respond in English, regardless of the question's language. Answer only from the attached policy documents and cite the source and page for every claim.",
    preamble: "You are a helpful HR assistant. Answer the employee's question based on the provided HR policy documents.",
    documents_heading: "POLICY DOCUMENTS:",
    question_heading: "EMPLOYEE'S QUESTION:",
    instructions_heading: "INSTRUCTIONS:",
    instructions: &[
        "Answer ONLY based on the information in the provided policy documents",
        "If the documents don't contain the needed information, clearly state: \"I don't have information about this in the available HR policies\"",
        "Be specific and reference which document/page you're referring to, e.g. [Document 1]",
        "Use a friendly, professional tone",
        "If policies are unclear or can be interpreted in multiple ways, mention this",
        "Keep answers concise but complete",
        "Don't make up or assume information not in the documents",
        "Always respond in ENGLISH",
    ],
    answer_heading: "ANSWER:",
    document_label: "Document",
    source_label: "Source",
    page_label: "Page",
    unknown_source: "Unknown",
    empty_index: "I don't have any relevant policy documents to answer this question. Please upload HR policy documents to get started.",
    below_threshold: "I couldn't find relevant information in the uploaded policies to answer this question. The question might be outside the scope of the available documents.",
};

fn phrasebook(language: Language) -> &'static Phrasebook {
    match language {
        Language::Swedish => &SWEDISH,
        Language::English => &ENGLISH,
    }
}

pub fn no_context_message(language: Language, reason: &NoContextReason) -> &'static str {
    let words = phrasebook(language);
    match reason {
        NoContextReason::EmptyIndex => words.empty_index,
        NoContextReason::BelowThreshold { .. } => words.below_threshold,
    }
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    turns: VecDeque<ConversationTurn>,
    history_limit: usize,
    language: Language,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(ConversationConfig::default())
    }
}

impl ConversationContext {
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            turns: VecDeque::with_capacity(config.history_limit + 1),
            history_limit: config.history_limit,
            language: config.language,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn append_turn(&mut self, role: Role, text: impl Into<String>) {
        self.turns.push_back(ConversationTurn {
            role,
            text: text.into(),
        });
        while self.turns.len() > self.history_limit {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn reset(&mut self) {
        self.turns.clear();
    }

    pub fn build_prompt(&self, question: &str, passages: &[RetrievedPassage]) -> PromptPayload {
        let words = phrasebook(self.language);
        let question = question.trim();

        let citations: Vec<Citation> = passages
            .iter()
            .enumerate()
            .map(|(position, passage)| Citation {
                anchor: position + 1,
                source_document: passage.chunk.source_document.clone(),
                page_number: passage.chunk.page_number,
                page_end: passage.chunk.page_end,
                similarity_score: passage.similarity_score,
            })
            .collect();

        let context = passages
            .iter()
            .zip(&citations)
            .map(|(passage, citation)| {
                format!(
                    "[{} {}] ({})\n{}",
                    words.document_label,
                    citation.anchor,
                    location(words, passage),
                    passage.chunk.text.trim()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let instructions = words
            .instructions
            .iter()
            .enumerate()
            .map(|(position, line)| format!("{}. {line}", position + 1))
            .collect::<Vec<_>>()
            .join("\n");

        let user_prompt = format!(
            "{}\n\n{}\n{}\n\n{} {}\n\n{}\n{}\n\n{}",
            words.preamble,
            words.documents_heading,
            context,
            words.question_heading,
            question,
            words.instructions_heading,
            instructions,
            words.answer_heading,
        );

        PromptPayload {
            system: words.system.to_string(),
            context,
            history: self.turns.iter().cloned().collect(),
            question: question.to_string(),
            user_prompt,
            citations,
        }
    }
}

fn location(words: &Phrasebook, passage: &RetrievedPassage) -> String {
    let source = if passage.chunk.source_document.trim().is_empty() {
        words.unknown_source
    } else {
        passage.chunk.source_document.as_str()
    };
    match passage.chunk.page_label() {
        Some(pages) => format!("{}: {source}, {} {pages}", words.source_label, words.page_label),
        None => format!("{}: {source}", words.source_label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn passage(source: &str, page: Option<u32>, text: &str, score: f64) -> RetrievedPassage {
        RetrievedPassage {
            chunk: Chunk {
                chunk_id: format!("{source}-{text}"),
                source_document: source.to_string(),
                text: text.to_string(),
                page_number: page,
                page_end: page,
                sequence_index: 0,
                char_start: 0,
            },
            similarity_score: score,
        }
    }

    fn english(history_limit: usize) -> ConversationContext {
        ConversationContext::new(ConversationConfig {
            history_limit,
            language: Language::English,
        })
    }

    #[test]
    fn history_keeps_most_recent_turns() {
        let mut context = english(4);
        for turn in 1..=6 {
            let role = if turn % 2 == 1 { Role::User } else { Role::Assistant };
            context.append_turn(role, format!("turn {turn}"));
        }

        let kept: Vec<&str> = context.turns().map(|turn| turn.text.as_str()).collect();
        assert_eq!(kept, vec!["turn 3", "turn 4", "turn 5", "turn 6"]);
    }

    #[test]
    fn zero_limit_keeps_no_history() {
        let mut context = english(0);
        context.append_turn(Role::User, "hello");
        assert!(context.is_empty());
    }

    #[test]
    fn reset_clears_history() {
        let mut context = english(4);
        context.append_turn(Role::User, "q");
        context.append_turn(Role::Assistant, "a");
        context.reset();
        assert_eq!(context.len(), 0);
    }

    #[test]
    fn prompt_sections_follow_fixed_order() {
        let mut context = english(4);
        context.append_turn(Role::User, "What about sick leave?");
        context.append_turn(Role::Assistant, "Report it on day one.");

        let passages = vec![
            passage("vacation.pdf", Some(2), "Employees get 25 vacation days.", 0.91),
            passage("handbook.docx", None, "Carry-over is capped at 5 days.", 0.8),
        ];
        let payload = context.build_prompt("  How many vacation days?  ", &passages);

        assert!(payload.system.contains("English"));
        assert_eq!(payload.question, "How many vacation days?");
        assert_eq!(payload.history.len(), 2);

        let documents = payload.user_prompt.find("POLICY DOCUMENTS:").unwrap();
        let question = payload.user_prompt.find("EMPLOYEE'S QUESTION:").unwrap();
        let instructions = payload.user_prompt.find("INSTRUCTIONS:").unwrap();
        assert!(documents < question && question < instructions);

        assert!(payload
            .context
            .contains("[Document 1] (Source: vacation.pdf, Page 2)\nEmployees get 25 vacation days."));
        assert!(payload.context.contains("[Document 2] (Source: handbook.docx)"));

        let messages = payload.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, "What about sick leave?");
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(messages[2].content, payload.user_prompt);
    }

    #[test]
    fn citations_map_anchors_to_sources() {
        let context = english(4);
        let payload = context.build_prompt(
            "q",
            &[
                passage("a.pdf", Some(3), "alpha", 0.9),
                passage("b.pdf", Some(7), "beta", 0.85),
            ],
        );

        assert_eq!(payload.citations.len(), 2);
        assert_eq!(payload.citations[1].anchor, 2);
        assert_eq!(payload.citations[1].source_document, "b.pdf");
        assert_eq!(payload.citations[1].page_number, Some(7));
    }

    #[test]
    fn swedish_prompt_uses_swedish_labels() {
        let context = ConversationContext::default();
        let payload = context.build_prompt("Hur många semesterdagar?", &[passage("semester.pdf", Some(1), "25 dagar", 0.9)]);

        assert_eq!(context.language(), Language::Swedish);
        assert!(payload.context.starts_with("[Dokument 1] (Källa: semester.pdf, Sida 1)"));
        assert!(payload.user_prompt.contains("Svara alltid på SVENSKA"));
    }

    #[test]
    fn prompt_is_deterministic() {
        let mut context = english(4);
        context.append_turn(Role::User, "earlier");
        let passages = vec![passage("a.pdf", Some(1), "text", 0.9)];
        assert_eq!(
            context.build_prompt("q", &passages),
            context.build_prompt("q", &passages)
        );
    }

    #[test]
    fn no_context_messages_are_localized() {
        let below = NoContextReason::BelowThreshold {
            best_score: 0.4,
            threshold: 0.7,
        };
        assert!(no_context_message(Language::English, &NoContextReason::EmptyIndex)
            .contains("upload HR policy documents"));
        assert!(no_context_message(Language::Swedish, &below).starts_with("Jag kunde inte"));
    }
}
