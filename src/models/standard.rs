use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::FeedbackError;

/// One of the four BCCNM professional-practice standards.
///
/// The only way to build a `StandardId` is through [`StandardId::new`] (or the
/// `TryFrom` impls), so every value in circulation is guaranteed to be in
/// `1..=4`. Serialized as a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct StandardId(u8);

/// Static description of a standard used for retrieval queries and prompts.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StandardInfo {
    pub id: StandardId,
    pub name: &'static str,
    pub full_name: &'static str,
    pub description: &'static str,
    pub key_areas: &'static [&'static str],
    pub example_questions: &'static [&'static str],
}

const CATALOGUE: [StandardInfo; 4] = [
    StandardInfo {
        id: StandardId(1),
        name: "Professional Responsibility",
        full_name: "Professional Responsibility and Accountability",
        description: "Maintaining professional standards, recognizing scope of practice and \
            personal limitations, managing clinical safety and risk, evidence-informed practice, \
            self-directed learning, professional conduct, respectful interactions and self-care.",
        key_areas: &[
            "Professional accountability, honesty and transparency",
            "Recognition of scope of practice and personal limitations",
            "Clinical safety and risk management",
            "Evidence-informed practice and self-directed learning",
            "Professional conduct and respectful interactions",
            "Self-care practices",
        ],
        example_questions: &[
            "How did the student demonstrate professional accountability in their practice?",
            "Can you provide an example of when the learner appropriately sought assistance?",
            "How well did the student manage clinical safety and identify potential risks?",
        ],
    },
    StandardInfo {
        id: StandardId(2),
        name: "Knowledge-Based Practice",
        full_name: "Knowledge-Based Practice",
        description: "Clinical competence and technical skills, critical thinking and clinical \
            reasoning, application of knowledge to client care, pharmacology and medication \
            safety, assessment and documentation.",
        key_areas: &[
            "Clinical competence and technical skills",
            "Critical thinking and clinical reasoning",
            "Knowledge application to patient care",
            "Pharmacology and medication safety",
            "Assessment and documentation",
        ],
        example_questions: &[
            "How would you describe the student's clinical competence and technical skills?",
            "Can you provide an example of the student's critical thinking in a clinical situation?",
            "Were there any concerns or strengths regarding medication administration?",
        ],
    },
    StandardInfo {
        id: StandardId(3),
        name: "Client-Focused Service",
        full_name: "Client-Focused Provision of Service",
        description: "Interprofessional collaboration, team communication, time management \
            and organization, client advocacy and coordination of care.",
        key_areas: &[
            "Interprofessional collaboration",
            "Team communication",
            "Time management and organization",
            "Patient advocacy",
            "Care coordination",
        ],
        example_questions: &[
            "How effectively did the student collaborate with the healthcare team?",
            "How did the student manage their time and prioritize tasks?",
            "Did you observe any instances of patient advocacy?",
        ],
    },
    StandardInfo {
        id: StandardId(4),
        name: "Ethical Practice",
        full_name: "Ethical Practice",
        description: "Ethical decision-making, client privacy and confidentiality, professional \
            boundaries, respect for diversity and cultural safety, and advocacy for vulnerable \
            populations.",
        key_areas: &[
            "Patient privacy and confidentiality",
            "Professional boundaries",
            "Respect for diversity",
            "Ethical decision-making",
            "Advocacy for vulnerable populations",
        ],
        example_questions: &[
            "How did the student maintain patient privacy and confidentiality?",
            "Can you provide an example of the student respecting professional boundaries?",
            "Were there any ethical situations the student handled well or needs to improve on?",
        ],
    },
];

impl StandardId {
    pub const FIRST: StandardId = StandardId(1);
    pub const LAST: StandardId = StandardId(4);
    pub const ALL: [StandardId; 4] = [StandardId(1), StandardId(2), StandardId(3), StandardId(4)];

    pub fn new(n: i64) -> Result<Self, FeedbackError> {
        match n {
            1..=4 => Ok(Self(n as u8)),
            _ => Err(FeedbackError::InvalidStandardIndex(n)),
        }
    }

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn info(self) -> &'static StandardInfo {
        &CATALOGUE[usize::from(self.0 - 1)]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn full_name(self) -> &'static str {
        self.info().full_name
    }

    /// Query text handed to the Retriever. Never the raw feedback.
    pub fn canonical_query(self) -> String {
        let info = self.info();
        format!(
            "{}. {} Key areas: {}.",
            info.full_name,
            info.description,
            info.key_areas.join("; ")
        )
    }

    /// Generic guidance used when the knowledge base has no block for this standard.
    pub fn builtin_guidance(self) -> &'static str {
        match self.0 {
            1 => "- Set one specific learning goal per shift and review it with your preceptor.\n\
                  - Ask for help early whenever a task is outside your current knowledge or scope.\n\
                  - Reflect in writing after each shift on one safety-related decision you made.",
            2 => "- Prepare for each client by reviewing diagnoses, medications and expected findings.\n\
                  - Verbalize your clinical reasoning to your preceptor before acting.\n\
                  - Look up unfamiliar medications before administration and state their purpose.",
            3 => "- Plan your shift using a written priority list and update it after each reassessment.\n\
                  - Introduce yourself to the care team and share updates using a structured handover.\n\
                  - Check in with the client about their goals before planning care.",
            _ => "- Review privacy and confidentiality expectations before each clinical day.\n\
                  - Discuss ethically challenging situations with your preceptor as they arise.\n\
                  - Reflect on how your own values may shape interactions with diverse clients.",
        }
    }

    /// Column in `session_records` holding this standard's summary.
    pub fn summary_column(self) -> &'static str {
        match self.0 {
            1 => "s1_summary",
            2 => "s2_summary",
            3 => "s3_summary",
            _ => "s4_summary",
        }
    }

    pub fn next(self) -> Option<StandardId> {
        match self.0 {
            1..=3 => Some(Self(self.0 + 1)),
            _ => None,
        }
    }

    pub fn catalogue() -> &'static [StandardInfo; 4] {
        &CATALOGUE
    }
}

impl TryFrom<i64> for StandardId {
    type Error = FeedbackError;

    fn try_from(n: i64) -> Result<Self, Self::Error> {
        Self::new(n)
    }
}

impl TryFrom<u8> for StandardId {
    type Error = FeedbackError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::new(i64::from(n))
    }
}

impl From<StandardId> for u8 {
    fn from(id: StandardId) -> Self {
        id.0
    }
}

impl fmt::Display for StandardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
