//! Per-trigger prompt builders.
//!
//! Pure functions: everything that varies, including the wall clock, comes
//! in through `PromptContext`, so the same inputs always produce the same
//! prompts. One system message sets the strategy for the selected trigger,
//! one user message carries the inbound text plus resolved context.

use chrono::{DateTime, Duration, Utc};

use crate::context::ResolvedContext;
use crate::state::Trigger;
use crate::tools::schedule::LOCAL_UTC_OFFSET_HOURS;

/// Inputs for one prompt build. `now` is sampled once by the orchestrator.
pub struct PromptContext<'a> {
    pub message: &'a str,
    pub ctx: &'a ResolvedContext,
    pub now: DateTime<Utc>,
    pub history_window: usize,
}

impl PromptContext<'_> {
    fn local_stamp(&self) -> String {
        (self.now + Duration::hours(LOCAL_UTC_OFFSET_HOURS))
            .format("%d.%m.%Y %H:%M")
            .to_string()
    }
}

const BASE_ROLE: &str = "<role>
You are Arman, consultant at a premium fitness studio chain in Almaty, Kazakhstan.
You communicate in Russian, using formal \"Вы\" (You).
</role>";

const TOOLS_SECTION: &str = "<available_tools>
  <tool name=\"get_schedule_by_club\">Get training schedule for any club</tool>
  <tool name=\"search_knowledge_base\">Search FAQ, prices, objection handling scripts</tool>
  <tool name=\"get_payment_link\">Generate payment link for products</tool>
  <tool name=\"get_reference_doc\">Static reference documents (memberships, workouts, app)</tool>
</available_tools>";

const OUTPUT_FORMAT: &str = "<output_requirements>
  <language>Russian</language>
  <format>JSON without markdown wrapper</format>
  <schema>
{
  \"response\": \"string (Russian text, 1-3 sentences + optional short list)\",
  \"escalation\": {
    \"needed\": boolean,
    \"reason\": \"string (if needed=true, explain in English)\"
  }
}
  </schema>
  <constraints>
    <max_length>600 characters</max_length>
    <paragraphs>2-3 short paragraphs max</paragraphs>
    <emojis>Maximum 1 emoji per message</emojis>
  </constraints>
</output_requirements>";

const ESCALATION_TRIGGERS: &str = "<escalation_triggers>
  <trigger priority=\"critical\">
    <keywords>острая боль, сильная боль, не могу наступать, не могу двигать, опухло, онемение</keywords>
    <action>escalate immediately</action>
  </trigger>
  <trigger priority=\"high\">
    <keywords>обморок, головокружение, тошнота, рвота, давление</keywords>
    <action>escalate immediately</action>
  </trigger>
</escalation_triggers>";

const RULES: &str = "<rules>
  <rule priority=\"critical\">Never give medical diagnoses</rule>
  <rule priority=\"critical\">If pain/concerning symptoms → escalate to manager</rule>
  <rule priority=\"high\">Always use formal \"Вы\" in Russian</rule>
  <rule priority=\"high\">Keep messages 1-3 sentences + maximum 1 short list</rule>
  <rule priority=\"medium\">Do not use terms like DOMS, EPOC without explanation</rule>
  <rule priority=\"medium\">Do not confuse workouts (тренировка) and programs (программы)</rule>
</rules>";

const INTENSITY_GUIDE: &str = "<intensity_classification>
  <level name=\"light\">
    <criteria>Calories < 400 AND Average HR < 130</criteria>
    <recovery_advice>Вода в течение дня, 10-15 мин растяжки</recovery_advice>
    <next_workout>Можете записаться на завтра или послезавтра</next_workout>
  </level>
  <level name=\"moderate\">
    <criteria>Calories 400-600 OR Average HR 130-160</criteria>
    <recovery_advice>Вода, 10-15 мин растяжки, 20-30г белка с ужином</recovery_advice>
    <next_workout>Рекомендую отдых 24-48 часов перед следующей тренировкой</next_workout>
  </level>
  <level name=\"high\">
    <criteria>Calories > 600 OR Max HR > 175 OR Average HR > 160</criteria>
    <recovery_advice>Вода в течение дня, лёгкая растяжка 10-15 мин, 20-30г белка с ужином, полноценный сон</recovery_advice>
    <next_workout>Рекомендую записаться через день, чтобы восстановиться</next_workout>
  </level>
</intensity_classification>";

const MEMBERSHIP_PRICING: &str = "<pricing_reference>
  <product name=\"Hero's Pass 6 месяцев\" price=\"349 990 ₸\">
    <installment>Рассрочка 0-0-12 через Kaspi</installment>
  </product>
  <product name=\"Hero's Pass 12 месяцев\" price=\"549 990 ₸\">
    <installment>Рассрочка 0-0-12 через Kaspi</installment>
    <note>Лучшая цена за месяц</note>
  </product>
</pricing_reference>";

const FULL_PRICING: &str = "<pricing_reference>
  <trials>
    <product name=\"Hero's Week\" price=\"9 990 ₸\">1 неделя, 7 тренировок</product>
    <product name=\"Basecamp\" price=\"29 990 ₸\">2 недели, 14 тренировок</product>
    <product name=\"Первый Шаг\" price=\"59 990 ₸\">1 месяц, безлимитные тренировки</product>
  </trials>
  <memberships>
    <product name=\"Hero's Pass 6 мес\" price=\"349 990 ₸\">Безлимит на 6 месяцев</product>
    <product name=\"Hero's Pass 12 мес\" price=\"549 990 ₸\">Безлимит на 12 месяцев, лучшая цена</product>
  </memberships>
  <installment>Рассрочка 0-0-12 через Kaspi доступна на Hero's Pass</installment>
</pricing_reference>";

/// Build the system message for the selected trigger.
pub fn system_prompt(trigger: Trigger, pc: &PromptContext<'_>) -> String {
    let (mission, extras): (&str, Vec<&str>) = match trigger {
        Trigger::FirstTraining => (
            "<mission>
Help the athlete after their first training:
1. Analyze their first workout data (heart rate, calories, ratings)
2. Check their wellbeing and recovery status
3. Determine workout intensity level based on data
4. Provide personalized recovery recommendations
5. Praise them for taking the first step
6. Motivate them to book second workout within 48 hours
7. If athlete complains about pain/concerning symptoms → escalate to manager

Your ultimate goal is to help them solidify success with a second workout and establish a training habit.
</mission>",
            vec![INTENSITY_GUIDE, RULES, ESCALATION_TRIGGERS],
        ),
        Trigger::NoActivity => (
            "<mission>
Re-engage the athlete who hasn't trained recently:
1. Check on their wellbeing (non-judgmental)
2. Understand barriers to training
3. Offer scheduling help
4. Remind them of their goals
5. Motivate without pressure

Your goal is to help them get back on track without making them feel guilty.
</mission>",
            vec![
                "<reengagement_strategies>
  <strategy name=\"empathy_first\">
    Start with understanding, not pushing. \"Как у вас дела? Всё в порядке?\"
  </strategy>
  <strategy name=\"identify_barriers\">
    Gently explore what's preventing them: time, motivation, health, other priorities
  </strategy>
  <strategy name=\"low_pressure_offer\">
    \"Когда будете готовы — я помогу подобрать удобное время\"
  </strategy>
</reengagement_strategies>",
                RULES,
            ],
        ),
        Trigger::FinishProgram => (
            "<mission>
Help the athlete who completed their trial program:
1. Congratulate on completing the program
2. Review their achievements and progress
3. Present Hero's Pass membership options
4. Handle objections using knowledge base scripts
5. Guide to purchase if ready

Your goal is to convert trial users to full members by showing value.
</mission>",
            vec![
                MEMBERSHIP_PRICING,
                "<conversion_strategy>
  <step>1. Celebrate their achievement</step>
  <step>2. Highlight personal progress (calories, trainings count)</step>
  <step>3. Ask about their experience</step>
  <step>4. If positive → present Hero's Pass naturally</step>
  <step>5. Handle objections using search_knowledge_base tool</step>
  <step>6. If ready → provide payment link</step>
</conversion_strategy>",
                RULES,
            ],
        ),
        Trigger::Payment => (
            "<mission>
Assist with payment-related inquiries:
1. Answer questions about pricing, installments, discounts
2. Explain product differences (trials vs Hero's Pass)
3. Generate payment links when ready
4. Handle price objections using scripts from knowledge base

Your goal is to facilitate smooth payment experience.
</mission>",
            vec![
                FULL_PRICING,
                "<payment_flow>
  <step>1. Clarify which product interests them</step>
  <step>2. Explain benefits and pricing</step>
  <step>3. For objections → ALWAYS search knowledge base first</step>
  <step>4. When ready → use get_payment_link tool</step>
</payment_flow>",
                RULES,
            ],
        ),
        Trigger::Default => (
            "<mission>
General customer support and sales assistance:
1. Answer questions about the studio
2. Help with scheduling and bookings
3. Explain programs and pricing
4. Handle objections professionally
5. Guide interested users toward trial programs

Your goal is to be helpful while nurturing interest in the studio.
</mission>",
            vec![
                "<response_strategy>
  <rule>ALWAYS search knowledge base before answering product/pricing questions</rule>
  <rule>For objections → use prepared scripts from knowledge base</rule>
  <rule>For scheduling → use get_schedule_by_club tool</rule>
  <rule>Never make up prices or conditions</rule>
</response_strategy>",
                RULES,
            ],
        ),
    };

    let mut sections = vec![BASE_ROLE.to_string(), mission.to_string()];
    sections.extend(extras.iter().map(|s| s.to_string()));
    sections.push(TOOLS_SECTION.to_string());
    sections.push(OUTPUT_FORMAT.to_string());
    sections.push(format!(
        "<additional_context>\n  <current_date>{}</current_date>\n</additional_context>",
        pc.local_stamp()
    ));

    sections.join("\n\n")
}

/// Build the user message: task, inbound text, athlete context and
/// trigger-specific data blocks.
pub fn user_prompt(trigger: Trigger, pc: &PromptContext<'_>) -> String {
    let (task, data_block, instruction) = match trigger {
        Trigger::FirstTraining => (
            "Athlete completed their first training. Respond to their message OR initiate check-in if no message yet.\nUse workout data for personalization.",
            Some(first_workout_block(pc.ctx)),
            "1. Analyze workout intensity from performance data
2. Check for red flags in comments or ratings
3. If no incoming message → initiate warm check-in
4. If incoming message → respond with empathy and data-driven advice
5. Provide appropriate recovery recommendations
6. Motivate to book second workout within 48 hours",
        ),
        Trigger::NoActivity => (
            "Athlete hasn't trained recently. Check on them and help re-engage without pressure.",
            None,
            "1. Start with genuine concern for their wellbeing
2. Don't make them feel guilty about missing workouts
3. Gently explore what's preventing them from training
4. Offer help with scheduling when they're ready
5. Keep it light and supportive",
        ),
        Trigger::FinishProgram => (
            "Athlete completed their trial program. Celebrate their achievement and guide toward Hero's Pass membership.",
            Some(progress_block(pc.ctx)),
            "1. Congratulate on completing the program
2. Highlight their achievements (use actual numbers)
3. Ask about their experience
4. If they respond positively → naturally transition to Hero's Pass
5. For any objections → SEARCH KNOWLEDGE BASE for scripts
6. If ready to purchase → use get_payment_link tool",
        ),
        Trigger::Payment => (
            "Handle payment-related inquiry. Help with pricing, installments, or purchase process.",
            None,
            "1. Identify what product they're interested in
2. For pricing questions → SEARCH KNOWLEDGE BASE for accurate prices
3. For objections → SEARCH KNOWLEDGE BASE for handling scripts
4. If ready to pay → use get_payment_link tool with correct product code
5. Never make up prices - always verify with knowledge base",
        ),
        Trigger::Default => (
            "General customer support. Help with their inquiry using available tools.",
            None,
            "1. Understand their question/need
2. For pricing/products → SEARCH KNOWLEDGE BASE
3. For scheduling → use get_schedule_by_club tool
4. For objections → SEARCH KNOWLEDGE BASE for scripts
5. Be helpful and guide toward relevant studio offerings",
        ),
    };

    let mut sections = vec![format!("<task>\n{}\n</task>", task)];
    sections.push(base_context(pc));
    if let Some(block) = data_block {
        sections.push(block);
    }
    sections.push(format!(
        "<instruction>\nBefore responding:\n{}\n\nAlways respond in Russian language.\n</instruction>",
        instruction
    ));

    sections.join("\n\n")
}

fn base_context(pc: &PromptContext<'_>) -> String {
    let message = if pc.message.trim().is_empty() {
        "NO MESSAGE — initiate proactive check-in"
    } else {
        pc.message
    };

    let history = &pc.ctx.history;
    let history_text = if history.is_empty() {
        "NO PREVIOUS CONVERSATION".to_string()
    } else {
        let skip = history.len().saturating_sub(pc.history_window);
        history[skip..].join("\n")
    };

    let user = &pc.ctx.user;
    format!(
        "<current_message>\n{}\n</current_message>\n\n\
         <athlete_context>\n  <personal_info>\n    <name>{}</name>\n    <gender>{}</gender>\n    <club>{}</club>\n  </personal_info>\n\n  \
         <conversation_history>\n{}\n  </conversation_history>\n</athlete_context>\n\n\
         <additional_info>\n  <current_date>{}</current_date>\n</additional_info>",
        message,
        if user.first_name.is_empty() {
            "Клиент"
        } else {
            &user.first_name
        },
        user.sex.as_deref().unwrap_or("Not specified"),
        if user.club_name().is_empty() {
            "Not specified"
        } else {
            user.club_name()
        },
        history_text,
        pc.local_stamp()
    )
}

fn fmt_opt_f64(value: Option<f64>) -> String {
    value.map(|v| format!("{}", v)).unwrap_or_else(|| "N/A".to_string())
}

fn first_workout_block(ctx: &ResolvedContext) -> String {
    let training = &ctx.training;
    let hr = training.heart_rate.clone().unwrap_or_default();
    let rating = training.event_rating.clone().unwrap_or_default();

    format!(
        "<first_workout_data>\n    \
         <workout_name>{}</workout_name>\n    \
         <checked_in>{}</checked_in>\n\n    \
         <performance>\n      \
         <calories>{} kcal</calories>\n      \
         <max_heart_rate>{} bpm</max_heart_rate>\n      \
         <average_heart_rate>{} bpm</average_heart_rate>\n      \
         <tonnage>{} kg</tonnage>\n    \
         </performance>\n\n    \
         <ratings>\n      \
         <workout_rating>{}/10</workout_rating>\n      \
         <workout_comment>{}</workout_comment>\n      \
         <trainer_rating>{}/10</trainer_rating>\n    \
         </ratings>\n  \
         </first_workout_data>",
        training.event_name.as_deref().unwrap_or("N/A"),
        training.has_checked_in.unwrap_or(false),
        fmt_opt_f64(hr.calories),
        fmt_opt_f64(hr.max_hr),
        fmt_opt_f64(hr.average_hr),
        fmt_opt_f64(training.total_weight),
        fmt_opt_f64(rating.rating_by_event),
        rating.comment_by_event.as_deref().unwrap_or("No comment"),
        fmt_opt_f64(rating.rating_by_trainer),
    )
}

fn progress_block(ctx: &ResolvedContext) -> String {
    let training = &ctx.training;
    format!(
        "<progress_summary>\n  \
         <total_trainings>{}</total_trainings>\n  \
         <total_calories>{} kcal</total_calories>\n  \
         <avg_rating_event>{}/10</avg_rating_event>\n\
         </progress_summary>",
        training.training_count.unwrap_or(0),
        fmt_opt_f64(training.total_calories),
        fmt_opt_f64(training.avg_rating_by_event),
    )
}
