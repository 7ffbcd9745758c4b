//! Prompt templates, one per [`GenerationMode`].
//!
//! Each template tells the model how to lay out its answer, and the split
//! policy for the same mode parses exactly that layout, so the two are always
//! chosen together through [`plan`].

use crate::services::references::ReferenceArticle;
use crate::splitter::SplitPolicy;
use crate::types::GenerationMode;

const REFERENCE_EXCERPT_CHARS: usize = 1000;

const STYLE_INTRO: &str = "Clickhole.com's Queen Elizabeth articles. They are funny, and have a very distinct style and tone, and are full of misspellings, typos and absurd syntax.";

/// A rendered prompt and the policy that parses the model's answer to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationPlan {
    pub prompt: String,
    pub policy: SplitPolicy,
}

pub fn plan(mode: GenerationMode, user_input: &str, references: &[ReferenceArticle]) -> GenerationPlan {
    GenerationPlan {
        prompt: build(mode, user_input, references),
        policy: mode.split_policy(user_input),
    }
}

pub fn build(mode: GenerationMode, user_input: &str, references: &[ReferenceArticle]) -> String {
    let samples = render_references(references);
    match mode {
        GenerationMode::Write => write_prompt(user_input, &samples),
        GenerationMode::Rewrite => rewrite_prompt(user_input, &samples),
        GenerationMode::Classic => classic_prompt(user_input, &samples),
    }
}

pub fn render_references(references: &[ReferenceArticle]) -> String {
    references
        .iter()
        .enumerate()
        .map(|(index, reference)| {
            let excerpt: String = reference.content.chars().take(REFERENCE_EXCERPT_CHARS).collect();
            format!(
                "REFERENCE EXAMPLE {}:\nTitle: {}\nContent: {}...\n\n---\n\n",
                index + 1,
                reference.title,
                excerpt
            )
        })
        .collect()
}

fn write_prompt(user_input: &str, samples: &str) -> String {
    format!(
        "Your job is to write in the style of {STYLE_INTRO}

I will be providing you some writing samples of real clickhole articles, and your job is to turn translate the user's input into the same style.

USER INPUT TO TRANSFORM:
\"{user_input}\"

WRITING SAMPLES:
{samples}

Write a complete Clickhole-style article. Write the article content FIRST, then on a new line after \"TITLE:\" write the clickhole-style title.

Example format:
This is the article body content that comes first...

More article content here...

TITLE: My Amazing Clickhole Title Here

Now write your article:"
    )
}

fn rewrite_prompt(user_input: &str, samples: &str) -> String {
    format!(
        "Your job is to rewrite existing text in the style of {STYLE_INTRO}

I will be providing you some writing samples of real clickhole articles, and your job is to rewrite the provided text to match this style exactly.

EXISTING TEXT TO REWRITE:
\"{user_input}\"

WRITING SAMPLES:
Use the following writing samples as a guide for the style and tone of the output.
{samples}

- Take the existing text and rewrite it completely in the Queen Elizabeth Clickhole style.
- Keep the core meaning and ideas, but transform the language, tone, and structure to match the reference examples.
- Add misspellings, typos, absurd syntax, and the distinctive voice shown in the samples.
- Do NOT add a title or introduction to the output
- Do NOT write an entire article, just rewrite the existing text in the style of the reference examples
- The number of paragraphs you return should be the same as the input
- The sentences in those paragraphs can be shorter or longer as needed

Example input:
I have lived a long and happy life, I am tired, and I no longer fear death

Example output:
Sometimes when your very tire of life you just want to crawl into you're favrite casket and take the biggest nap of you're life (death).

Now rewrite this text:"
    )
}

fn classic_prompt(user_input: &str, samples: &str) -> String {
    format!(
        "Your job is to write in the style of {STYLE_INTRO}

I will be providing you some writing samples of real clickhole articles, and your job is to turn translate the user's input into the same style.

USER INPUT TO TRANSFORM:
\"{user_input}\"

WRITING SAMPLES:
{samples}

Write a complete Clickhole-style article. Start with the title on the first line, then a blank line, then the article body. Do not use any JSON formatting, quotes, or special characters around the title or body. Just write the title and article naturally.

Example format:
My Amazing Title Here

This is the article body content that follows...

Now write your article:"
    )
}
