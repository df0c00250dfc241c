//! Prompt construction for analysis and redraw requests.

use crate::models::{Artifact, EvaluationModel, EvaluationReport, Persona};

/// Persona profile block shared by both prompts.
pub fn persona_profile(persona: &Persona) -> String {
    let a = &persona.attributes;
    format!(
        "Role: {}\nName: {}\nDescription: {}\nAge: {}\nTech savviness: {}\n\
         Domain knowledge: {}\nGoals: {}\nEnvironment: {}\n\
         Frustration tolerance: {}\nDevice habits: {}\n",
        persona.role,
        persona.name,
        persona.description,
        a.age,
        a.tech_savviness,
        a.domain_knowledge,
        a.goals,
        a.environment,
        a.frustration_tolerance,
        a.device_habits,
    )
}

fn rubric(model: EvaluationModel) -> &'static str {
    match model {
        EvaluationModel::Ues => UES_RUBRIC,
        EvaluationModel::Ets => ETS_RUBRIC,
    }
}

fn subject_line(artifact: &Artifact) -> String {
    match artifact {
        Artifact::Image(_) => "a single UI screenshot".to_string(),
        Artifact::Flow(steps) => format!(
            "a user flow of {} ordered screenshots; each image is preceded by its step description",
            steps.len()
        ),
        Artifact::Video(_) => "a screen recording of the product in use".to_string(),
    }
}

/// Prompt for the structured analysis call.
pub fn analysis_prompt(artifact: &Artifact, persona: &Persona, model: EvaluationModel) -> String {
    let dimensions = model.dimension_labels();
    let severities = model.severity_levels();

    let mut prompt = String::new();
    prompt.push_str("You are a world-class experience evaluation agent.\n");
    prompt.push_str(&format!(
        "Audit {} strictly under the {} evaluation model.\n\n",
        subject_line(artifact),
        model
    ));
    prompt.push_str("The audit must be carried out from the point of view of this persona:\n");
    prompt.push_str(&persona_profile(persona));
    prompt.push_str("\nEvaluation criteria:\n");
    prompt.push_str(rubric(model));
    prompt.push_str("\n\nRespond with strict JSON only, containing:\n");
    prompt.push_str("- overallScore: integer 0-100.\n");
    prompt.push_str(&format!(
        "- dimensionScores: exactly {} entries with the dimension labels [{}], each with score 0-100 and a short comment.\n",
        dimensions.len(),
        dimensions.join(", ")
    ));
    prompt.push_str("- executiveSummary: a qualitative summary of the experience.\n");
    prompt.push_str(
        "- personaPerspective: how this persona in particular experiences the product, in first person.\n",
    );
    prompt.push_str(&format!(
        "- issues: concrete UI problems with severity one of [{}], location, description and recommendation. Do not invent problems.\n",
        severities.join(", ")
    ));
    prompt.push_str(
        "- optimizationSuggestions: a few strategic, constructive suggestions. Leave empty if there are none worth making.\n",
    );
    prompt
}

/// Prompt for the redraw call, focused on the persona's priority issues.
pub fn regeneration_prompt(persona: &Persona, report: &EvaluationReport) -> String {
    let critical: Vec<String> = report
        .priority_issues()
        .map(|i| {
            format!(
                "- Location: {}, problem: {}, fix: {}",
                i.location, i.description, i.recommendation
            )
        })
        .collect();

    let suggestions: Vec<String> = report
        .optimization_suggestions
        .iter()
        .map(|s| format!("- {}", s))
        .collect();

    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are a world-class UI/UX designer. Redesign the attached screen for the user \"{}\".\n",
        persona.name
    ));
    prompt.push_str("The goal is to fix the specific problems found in the audit.\n\n");
    prompt.push_str(&format!(
        "Persona:\n- Age: {}\n- Tech savviness: {}\n- Goals: {}\n\n",
        persona.attributes.age, persona.attributes.tech_savviness, persona.attributes.goals
    ));
    prompt.push_str("High-priority problems to fix:\n");
    if critical.is_empty() {
        prompt.push_str("- None flagged; improve the overall experience.\n");
    } else {
        prompt.push_str(&critical.join("\n"));
        prompt.push('\n');
    }
    if !suggestions.is_empty() {
        prompt.push_str("\nStrategic suggestions:\n");
        prompt.push_str(&suggestions.join("\n"));
        prompt.push('\n');
    }
    prompt.push_str(
        "\nRequirements:\n\
         1. Targeted fixes: enlarge small targets, raise low contrast, tidy a cluttered layout.\n\
         2. Keep the brand colours and functional logic; produce the fixed version of this product, not a different one.\n\
         3. High fidelity, modern, clean and professional.\n\n\
         Output only the redesigned UI image.",
    );
    prompt
}

const UES_RUBRIC: &str = "\
1. Usability - learnability, memorability, efficiency of use.
2. Consistency - visual, interaction and copy consistency.
3. Clarity - information hierarchy and readability.
4. Aesthetics - visual appeal and restraint.
5. Efficiency - task completion speed and shortcuts.";

const ETS_RUBRIC: &str = "\
1. Function Flow - closed-loop flows, discoverable entry points, traceable logic, guidance at key steps.
2. Information Cognition - accurate and complete content, unambiguous copy, consistency across pages.
3. Interaction Design - visible state and feedback, clear navigation, fewer steps, error prevention.
4. System Performance - stability, compatibility, responsiveness.
5. Information Safety - privacy protection, transaction safety, risk warnings and remedies.
6. Visual Design - uncluttered layout, unified icon and colour style, pleasant visuals.
7. Intelligence - user insight and recommendations, accurate intent recognition, emotional design.
8. Operation Service - timely content, professional support, perceived value.";
