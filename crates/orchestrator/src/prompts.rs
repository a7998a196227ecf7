use carousel_core::{AspectRatio, RunInput};

use crate::stages::{ContentOutline, Finding, ResearchFindings, VisualAssets};

pub struct StagePrompts;

impl StagePrompts {
    pub fn research(input: &RunInput) -> String {
        format!(
            r#"You are a senior research analyst preparing a slide deck briefing.

## Brief
**Topic:** {topic}
**Audience:** {persona}
**Slides:** {count}
**Format:** {aspect} slides

## Instructions
1. Search the web for current, verifiable information about the topic
2. Select exactly {count} distinct insights, one per slide, ordered as a narrative
3. Prefer insights backed by a concrete statistic
4. For each insight, describe an illustration that would work as a {aspect} image
5. Where a number series tells the story better as a chart, include a short Python
   snippet (matplotlib or plotly) that saves the chart as PNG into the directory
   named by the `CAROUSEL_CHART_DIR` environment variable

## Required Output
Respond with JSON only:

```json
{{
  "findings": [
    {{
      "headline": "Short slide headline",
      "summary": "Two or three sentences for the audience",
      "statistic": "Optional key number with unit",
      "visual_prompt": "Description of the slide illustration",
      "chart_snippet": "Optional Python code",
      "source": "Optional source URL"
    }}
  ]
}}
```"#,
            topic = input.topic,
            persona = input.audience_persona,
            count = input.slide_count,
            aspect = input.aspect_ratio,
        )
    }

    pub fn cover_image(input: &RunInput) -> String {
        format!(
            "Editorial cover illustration for a presentation titled \"{topic}\". \
             Audience: {persona}. Clean composition with generous negative space \
             for a title overlay, {orientation} framing, no text in the image.",
            topic = input.topic,
            persona = input.audience_persona,
            orientation = Self::orientation(input.aspect_ratio),
        )
    }

    pub fn slide_image(input: &RunInput, finding: &Finding) -> String {
        let subject = finding
            .visual_prompt
            .clone()
            .unwrap_or_else(|| format!("{}. {}", finding.headline, finding.summary));
        format!(
            "{subject}. Style: modern editorial illustration consistent with a deck about \
             \"{topic}\", {orientation} framing, no text in the image.",
            subject = subject.trim_end_matches('.'),
            topic = input.topic,
            orientation = Self::orientation(input.aspect_ratio),
        )
    }

    pub fn content_structuring(input: &RunInput, findings: &ResearchFindings) -> String {
        let findings_block = findings
            .findings
            .iter()
            .enumerate()
            .map(|(i, f)| {
                let mut entry = format!("{}. **{}**: {}", i + 1, f.headline, f.summary);
                if let Some(stat) = &f.statistic {
                    entry.push_str(&format!(" (key figure: {})", stat));
                }
                entry
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            r#"You are a content strategist turning research into a slide narrative.

## Brief
**Topic:** {topic}
**Audience:** {persona}
**Slides:** {count}

## Findings
{findings}

## Instructions
1. Write a deck title and a one-line subtitle
2. Write exactly {count} slides, one per finding, in the same order
3. Each slide has a headline of at most eight words and a body of at most 45 words
4. Address the audience directly; keep statistics exact

## Required Output
Respond with JSON only:

```json
{{
  "title": "Deck title",
  "subtitle": "One-line subtitle",
  "slides": [{{ "headline": "Slide headline", "body": "Slide body" }}]
}}
```"#,
            topic = input.topic,
            persona = input.audience_persona,
            count = input.slide_count,
            findings = findings_block,
        )
    }

    /// `outline` must already carry image paths relative to the document.
    pub fn document_assembly(input: &RunInput, outline: &ContentOutline) -> String {
        let outline_json =
            serde_json::to_string_pretty(outline).unwrap_or_else(|_| "{}".to_string());

        format!(
            r#"You are a presentation designer producing a single self-contained HTML document.

## Outline
```json
{outline}
```

## Instructions
1. One full-page section per slide, preceded by a cover section using `cover_image`
2. Page size follows this CSS rule: `{page_style}`
3. Reference every image exactly by the relative path given in the outline
4. Inline all CSS; no external fonts, scripts or stylesheets
5. Use readable contrast for an audience of: {persona}

## Required Output
Respond with the complete HTML document in a ```html code block."#,
            outline = outline_json,
            page_style = input.aspect_ratio.page_style(),
            persona = input.audience_persona,
        )
    }

    pub fn findings_review(input: &RunInput, findings: &ResearchFindings) -> String {
        let mut prompt = format!(
            "Research for \"{}\" found {} findings ({} sources):",
            input.topic,
            findings.findings.len(),
            findings.citations.len()
        );
        for (i, finding) in findings.findings.iter().enumerate() {
            prompt.push_str(&format!("\n  {}. {}", i + 1, finding.headline));
        }
        prompt.push_str("\nGenerate visuals from these findings?");
        prompt
    }

    pub fn visuals_review(input: &RunInput, visuals: &VisualAssets) -> String {
        let charts: usize = visuals.slides.iter().map(|s| s.charts.len()).sum();
        format!(
            "Visuals for \"{}\" are in place: cover {}, {} slide image(s), {} chart(s). Write the slide copy?",
            input.topic,
            visuals.cover.display(),
            visuals.slides.len(),
            charts
        )
    }

    pub fn document_approval(input: &RunInput) -> String {
        format!(
            "Outline for \"{}\" is ready ({} slides, {}). Assemble the HTML document?",
            input.topic, input.slide_count, input.aspect_ratio
        )
    }

    fn orientation(aspect_ratio: AspectRatio) -> &'static str {
        match aspect_ratio {
            AspectRatio::Landscape => "wide landscape",
            AspectRatio::Portrait => "tall portrait",
            AspectRatio::Square => "square",
        }
    }
}
