use crate::model::story::StoryInput;

pub fn build_test_case_prompt(story: &StoryInput, language: &str) -> String {
    format!(
        r#"You are an expert test case designer. Based on the user story below, generate a complete set of test cases, written in {language}, that verify every acceptance criterion is met.

Each test case is an object with these fields:
- title: a short, descriptive title for this specific test case (e.g. "Verify login with valid credentials"). It must not be empty and must be unique among the test cases you generate for this story.
- description: a brief summary of what this test case verifies. It must not be empty.
- steps: an array of at least one step. Each step has:
    - action: the specific action to perform in this step. It must not be empty.
    - expectedResult: the specific, observable result expected after the action. It must not be empty.

All text must be written exclusively in {language}. Steps must be clear and direct.

User story:
Title: {title}
Description: {description}
Acceptance criteria: {criteria}

Test cases (in {language}, following the JSON structure of the output schema, with no empty text fields):"#,
        language = language,
        title = story.title,
        description = story.description,
        criteria = story.acceptance_criteria,
    )
}

pub fn build_summary_prompt(acceptance_criteria: &str) -> String {
    format!("Summarize the following acceptance criteria:\n\n{acceptance_criteria}")
}
