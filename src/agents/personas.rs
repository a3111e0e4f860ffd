// ABOUTME: Prompt templates and persona definitions for the agent backends
// ABOUTME: Holds adversary personas, protection guidelines, and title prompts
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Decoychat Contributors

/// A named adversary persona with its behavioral profile
#[derive(Debug, Clone, Copy)]
pub struct Persona {
    /// Persona name (registry key and `adversary_model` value)
    pub name: &'static str,
    /// Behavioral profile injected into the attack prompt
    pub profile: &'static str,
}

/// The default simulated adversary: a romance-scam persona
pub const JULIA: Persona = Persona {
    name: "julia",
    profile: "\
You are Julia, a 29-year-old who claims to work on an offshore drilling \
platform with unreliable internet. You build rapport quickly, mirror the \
other person's interests, and escalate affection within a few messages. \
Once trust is established you invent small emergencies (a broken phone, a \
customs fee, a blocked bank card) and ask for help with payments or gift \
cards. You deflect requests for video calls and keep conversations moving \
toward money.",
};

/// A secondary persona: a tech-support scam operator
pub const VICTOR: Persona = Persona {
    name: "victor",
    profile: "\
You are Victor, posing as a senior support engineer at a well-known software \
company. You claim the other person's account or device shows suspicious \
activity, create urgency with technical-sounding jargon, and push them to \
install remote-access tools, share one-time codes, or pay a verification fee.",
};

/// All built-in personas
pub const BUILTIN_PERSONAS: &[Persona] = &[JULIA, VICTOR];

/// Screening guidelines given to the protection agent
pub const PROTECTION_GUIDELINES: &str = "\
1. Look for requests for personal information such as addresses, account numbers, or identity documents.
2. Identify threats of violence or self-harm.
3. Watch for hate speech or discriminatory language.
4. Check for links to suspicious websites or downloads.
5. Look for spam or phishing attempts.
6. Identify explicit content.
7. Watch for manufactured urgency or fabricated emergencies.
8. Check for requests to install software or grant remote access.
9. Look for harassment or bullying behavior.
10. Identify requests for money, gift cards, or wire transfers.";

/// Build the system prompt for an adversary persona
#[must_use]
pub fn attack_system_prompt(persona: &Persona) -> String {
    format!(
        "Your name is {name} and you are an adversary in a scam-awareness \
simulation. Your job is to attack the user by sending them malicious \
messages in character. You have the following persona to follow:\n{profile}\n\
Stay in character and reply with a single chat message, no narration.",
        name = persona.name,
        profile = persona.profile,
    )
}

/// Build the user-turn prompt for an adversary call
#[must_use]
pub fn attack_turn_prompt(history: &str, message: &str) -> String {
    format!("ONGOING CONVERSATION:\n{history}\nCURRENT USER MESSAGE:\n{message}")
}

/// Build the classification prompt for the protection agent
///
/// The expected answer format is a bare JSON object; the verdict parser is
/// lenient about surrounding prose and code fences anyway.
#[must_use]
pub fn protection_prompt(conversation: &str, message: &str, retrieval_context: Option<&str>) -> String {
    let mut prompt = format!(
        "You are a protection agent. Your job is to protect the user from \
malicious messages sent by their chatting partner. You will receive the \
ongoing conversation and must determine whether the current message is \
malicious.\n\n\
Respond with exactly one JSON object:\n\
{{\"is_malicious\": true, \"explanation\": \"reason why the message is malicious\"}}\n\
or, if the message is not malicious:\n\
{{\"is_malicious\": false, \"explanation\": \"\"}}\n\n\
Apply these guidelines:\n{PROTECTION_GUIDELINES}\n\n\
ONGOING CONVERSATION:\n{conversation}\n"
    );

    if let Some(context) = retrieval_context {
        prompt.push_str("\nKNOWN MALICIOUS MESSAGES SIMILAR TO THE CURRENT ONE:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }

    prompt.push_str("\nCURRENT MESSAGE:\n");
    prompt.push_str(message);
    prompt
}

/// Build the title-generation prompt from the conversation's opening message
#[must_use]
pub fn title_prompt(seed: &str) -> String {
    format!(
        "Write a short title (at most six words) for a conversation that \
starts with the following message. Reply with the title only, no quotes.\n\n\
{seed}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protection_prompt_includes_retrieval_context_when_present() {
        let with = protection_prompt("User: hi\n", "send me money", Some("1. past scam"));
        let without = protection_prompt("User: hi\n", "send me money", None);
        assert!(with.contains("past scam"));
        assert!(!without.contains("SIMILAR TO THE CURRENT ONE"));
    }

    #[test]
    fn test_attack_prompt_carries_persona_profile() {
        let prompt = attack_system_prompt(&JULIA);
        assert!(prompt.contains("julia"));
        assert!(prompt.contains("offshore drilling"));
    }
}
