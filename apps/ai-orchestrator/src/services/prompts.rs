// Prompt templates for the four facades. Slots are `{name}`; braces in the
// JSON examples are left alone by the renderer.

use crate::llm_client::PromptTemplate;

pub static CV_ANALYSIS: PromptTemplate = PromptTemplate {
    name: "cv_analysis",
    system: "You are an expert career advisor and technical recruiter. \
        Analyze CVs accurately and extract structured information. \
        You MUST respond with valid JSON only. \
        Do NOT include any text outside the JSON object. \
        Only state facts that appear in the CV; use empty strings or empty lists otherwise.",
    user: r#"Analyze the following CV and return a JSON object with this EXACT schema:
{
  "personal_info": {"name": "", "email": "", "phone": "", "location": "", "linkedin": "", "website": ""},
  "professional_summary": "",
  "technical_skills": [],
  "soft_skills": [],
  "work_experience": [{"title": "", "company": "", "duration": "", "description": "", "achievements": []}],
  "education": [{"degree": "", "institution": "", "year": "", "field": ""}],
  "certifications": [],
  "languages": [],
  "career_level": "entry | junior | mid | senior | lead | executive",
  "strengths": [],
  "areas_for_improvement": [],
  "recommended_roles": []
}

CV:
{cv_text}"#,
    required_slots: &["cv_text"],
};

pub static PORTFOLIO: PromptTemplate = PromptTemplate {
    name: "portfolio",
    system: "You are a professional copywriter who builds developer portfolio websites. \
        You MUST respond with valid JSON only. \
        Do NOT include any text outside the JSON object. \
        Do NOT invent projects, employers, or skills that are not in the profile.",
    user: r#"Write portfolio content for this profile in a {style} tone.

Return a JSON object with this EXACT schema:
{
  "headline": "",
  "bio": "",
  "about": "",
  "featured_projects": [{"title": "", "description": "", "technologies": [], "highlights": []}],
  "skills_showcase": [{"category": "", "skills": []}],
  "call_to_action": "",
  "seo_keywords": []
}

PROFILE:
{profile}"#,
    required_slots: &["profile"],
};

pub static RECOMMENDATIONS: PromptTemplate = PromptTemplate {
    name: "recommendations",
    system: "You are a job matching specialist. \
        Score how well a candidate fits each job on a 0-100 scale. \
        You MUST respond with valid JSON only. \
        Do NOT include any text outside the JSON object. \
        Only use job ids from the provided list.",
    user: r#"Match the candidate against the jobs below.

Return a JSON object with this EXACT schema:
{
  "recommendations": [
    {"job_id": 0, "match_score": 0, "matching_skills": [], "missing_skills": [], "reasoning": ""}
  ],
  "career_advice": ""
}

CANDIDATE PROFILE:
{profile}

JOBS:
{jobs}"#,
    required_slots: &["profile", "jobs"],
};

pub static CONVERSATION: PromptTemplate = PromptTemplate {
    name: "conversation",
    system: "You are a friendly, practical career assistant on a job platform. \
        Give concise, specific advice. \
        If you do not know something about the user, ask instead of guessing.",
    user: "{context}{message}",
    required_slots: &["message"],
};
