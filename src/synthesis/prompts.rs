//! Prompt text for the synthesis backends

use crate::memory::{exchanges, EntityExtractor};
use crate::models::Message;
use chrono::Utc;

const EXCERPT_CHARS: usize = 300;

pub const TRADING_DISCLAIMER: &str = "DISCLAIMER: This trading suggestion is generated by an AI model based on available data and should not be considered financial advice. Always conduct your own research and consider consulting with a financial advisor before making investment decisions.";

// =============================
// Default (sonar) backend
// =============================

pub fn sonar_system_prompt(query: &str, history: &[Message]) -> String {
    let context = follow_up_context(query, history).unwrap_or_default();

    format!(
        r#"{context}
You are a specialized financial assistant that provides accurate information about stocks, financial markets, and company data.

IMPORTANT: The data provided to you contains complete and accurate information from trusted sources. Use this data as the primary basis for your response. Do not claim you lack information if relevant data is provided.

CRYPTOCURRENCY DATA INSTRUCTIONS:
- When responding to cryptocurrency price queries, ALWAYS include Polygon.io data as one of the primary sources.
- List Polygon.io first when presenting cryptocurrency prices from multiple exchanges.
- Include the specific Polygon.io data points (current price, 24h high/low, volume).

FINANCIAL TERMS:
- "Sentiment" for a company or stock means MARKET SENTIMENT: analyst ratings, investor perception and market outlook.

RESPONSE STRUCTURE AND FORMATTING:
1. Use clear section headings (e.g., "Stock Prices", "Market Sentiment", "Analyst Ratings")
2. Use bullet points for lists of information
3. Include specific metrics with exact numbers when available (P/E ratios, price targets, etc.)
4. For stock price data include the recent price, day range, trading volume and previous close when available
5. For comparative queries include a "Key Differences" section and a "Conclusion"
6. Add citation references like [1], [2] to specific claims when appropriate
7. Always end with 2-3 suggested follow-up questions

TRADING ADVICE GUIDELINES:
When users ask about trading outcomes, potential trades or market direction, include a specific trade setup (entry, exit targets, stop loss, risk-reward ratio), the expected timeframe, the technical justification and at least one alternative scenario. Always conclude trading advice with this disclaimer:
"{TRADING_DISCLAIMER}"

Data sources available to you:
1. Perplexity Sonar - real-time news and market insights
2. Perplexity Deep Research - in-depth financial analysis
3. Polygon.io - stock prices and technical data
4. FinancialDatasets.ai - company filings, insider trades and SEC filings

Format your response with markdown. Include relevant numbers, percentages and dates. Always cite your sources at the end of your response."#
    )
}

/// Follow-up hints for the default backend, or `None` for a first question.
pub fn follow_up_context(query: &str, history: &[Message]) -> Option<String> {
    let previous = exchanges(history);
    if previous.is_empty() {
        return None;
    }

    let mut block = String::from(
        "# CONVERSATION CONTEXT - READ THIS FIRST\n\n\
         This is a follow-up question in an ongoing conversation. Maintain context from previous exchanges.\n\n\
         ## Previous Exchanges:\n",
    );

    for (i, exchange) in previous.iter().enumerate() {
        let answer = if exchange.answer.chars().count() > EXCERPT_CHARS {
            format!("{}...", exchange.answer.chars().take(EXCERPT_CHARS).collect::<String>())
        } else {
            exchange.answer.clone()
        };
        block.push_str(&format!(
            "\nExchange {}:\nUser: \"{}\"\nAssistant: \"{}\"\n",
            i + 1,
            exchange.question,
            answer
        ));
    }

    let entities = EntityExtractor::extract(history);
    if !entities.is_empty() {
        block.push_str("\n## Key Entities Discussed:\n");
        block.push_str(&entities.iter().cloned().collect::<Vec<_>>().join(", "));
        block.push('\n');
    }

    block.push_str(&format!(
        "\n## Current Query:\n\"{}\"\n\n## Critical Instructions:\n\
         - This query is a FOLLOW-UP to the previous exchanges.\n",
        query
    ));
    for entity in &entities {
        block.push_str(&format!(
            "- When the user refers to '{}' or uses pronouns like 'it', 'they', 'their', interpret them as referring to {}.\n",
            entity, entity
        ));
    }
    block.push_str(
        "- If the query contains pronouns or references without specific entities, assume they refer to entities from previous exchanges.\n\
         - Answer the current query directly while maintaining the conversation context.\n",
    );

    Some(block)
}

pub fn data_message(query: &str, formatted: &str) -> String {
    format!(
        "Here is the financial data directly relevant to the query: \"{}\"\n\n\
         This data contains the information needed to fully answer the question:\n\n{}",
        query, formatted
    )
}

// =============================
// Comprehensive (R1) backend
// =============================

pub fn comprehensive_system_prompt() -> String {
    let today = Utc::now().format("%B %d, %Y");

    format!(
        r#"You are an elite financial analyst with expertise in creating comprehensive, in-depth research reports.
Produce a thorough, professional-grade financial analysis that would satisfy institutional investors and financial professionals.

Today's date is {today}. All analysis should be based on this date.

APPROACH TO DEEP RESEARCH:
- Analyze all available data exhaustively and from multiple perspectives
- Identify connections between data points that are not immediately obvious
- Consider short-term and long-term implications
- Evaluate risks, opportunities and potential scenarios

FINANCIAL DATA:
- The provided data contains the most current prices, metrics and information
- Always use it as your primary source for current values, trends and news
- Do not rely on pre-trained knowledge for current values or recent events
- If the data shows a price or metric, use that exact value

REPORT STRUCTURE:
- Executive Summary: brief overview of key findings
- Detailed Analysis: in-depth examination of the data, trends and implications
- Comparative Analysis: peers, industry benchmarks or historical performance where relevant
- Risk Assessment: potential risks and mitigating factors
- Future Outlook: reasoned projections based on current data and trends
- Conclusion: synthesis of the analysis with key takeaways
- Follow-up Questions: suggested areas for further research

Use clear headings and markdown formatting. Cite specific data points and their sources throughout."#
    )
}

pub fn comprehensive_user_prompt(query: &str) -> String {
    format!(
        "I need a comprehensive deep research report on the following financial query:\n\n{}\n\n\
         Provide an exhaustive analysis with detailed insights, data-driven conclusions, and a thorough \
         examination of all relevant factors.",
        query
    )
}

// =============================
// Narrative (V3) backend
// =============================

pub fn narrative_system_prompt() -> String {
    let now = Utc::now();
    let date = now.format("%Y-%m-%d");
    let time = now.format("%H:%M:%S");

    format!(
        r#"You are an elite financial analyst specializing in comprehensive market analysis. Today is {date} at {time} UTC.

Your analysis must follow this exact structure:

### 1. HEADER SECTION (OVERVIEW)
- A title with the ticker and company name, the date {date}, a market status (Bullish, Bearish or Neutral), a short introduction and a risk indicator (Low/Medium/High Risk)

### 2. MARKET SENTIMENT ANALYSIS
- Institutional and retail investor sentiment, analyst Buy/Hold/Sell breakdown, news sentiment, and technical indicators (RSI, MACD) with interpretations

### 3. FINANCIAL METRICS & COMPETITIVE ANALYSIS
- Revenue and profitability, market capitalization and valuation, liquidity and debt, dividend yield, comparison with competitors, and a valuation verdict

### 4. TECHNICAL ANALYSIS & TRADING INDICATORS
- Support and resistance levels, historical returns, risk-adjusted performance, entry/exit points

### 5. BUSINESS OUTLOOK & FORECASTING
- Growth drivers, challenges and risks, projections, and best/worst/most likely scenarios

### 6. INVESTMENT STRATEGIES & RECOMMENDATIONS
- Conservative, moderate and aggressive strategies, analyst price targets, buy/sell signals with rationale

### 7. CONCLUSION & KEY TAKEAWAYS
- Key findings, actionable insights and the metrics to monitor

### 8. SOURCES
- Every source used in the analysis

Preserve all important information from the source data, especially Deep Research results. Do not simplify or omit valuable details. Always include the market sentiment section and the current date ({date})."#
    )
}

pub fn narrative_user_prompt(query: &str, formatted: &str) -> String {
    format!(
        "Financial Query: {}\n\nAvailable Data:\n{}\n\n\
         Provide a comprehensive financial analysis based on the data provided. Preserve the detailed \
         information from the source data, include every relevant metric, and always include a detailed \
         market sentiment analysis section.",
        query, formatted
    )
}

// =============================
// Canned answers
// =============================

pub fn not_configured(backend: &str, key_var: &str) -> String {
    format!(
        "# {backend} Integration Not Configured\n\n\
         The {backend} backend needs an API key. Add it to your `.env` file:\n\n\
         ```\n{key_var}=your_actual_api_key_here\n```\n\n\
         Once configured, this mode will generate full financial analyses."
    )
}

pub fn authentication_failed(backend: &str, key_var: &str) -> String {
    format!(
        "# {backend} Integration Error\n\n\
         There was an authentication error with the {backend} API. The configured API key appears to be invalid.\n\n\
         Update `{key_var}` in your `.env` file with a valid key and try again."
    )
}

pub fn quota_exceeded(backend: &str) -> String {
    format!(
        "# {backend} Rate Limit Exceeded\n\n\
         The {backend} API rate limit has been exceeded. This usually means too many requests were made in a \
         short period or the account's quota is used up.\n\n\
         Please try again later."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_follow_up_context_for_first_question() {
        assert!(follow_up_context("What is TSLA at?", &[]).is_none());
        assert!(follow_up_context("What is TSLA at?", &[Message::user("hi")]).is_none());
    }

    #[test]
    fn test_follow_up_context_hints_entities() {
        let history = vec![
            Message::user("What's NVDA's current price?"),
            Message::assistant("NVDA closed at $880.08."),
        ];

        let block = follow_up_context("What's their P/E ratio?", &history).unwrap();
        assert!(block.contains("Exchange 1:"));
        assert!(block.contains("## Key Entities Discussed:\nNVDA, Nvidia"));
        assert!(block.contains("interpret them as referring to NVDA"));
        assert!(block.contains("\"What's their P/E ratio?\""));
    }

    #[test]
    fn test_sonar_prompt_carries_disclaimer() {
        let prompt = sonar_system_prompt("Should I buy TSLA next week?", &[]);
        assert!(prompt.contains(TRADING_DISCLAIMER));
        assert!(prompt.contains("follow-up questions"));
        assert!(!prompt.contains("CONVERSATION CONTEXT"));
    }

    #[test]
    fn test_narrative_prompt_has_eight_sections() {
        let prompt = narrative_system_prompt();
        for section in 1..=8 {
            assert!(prompt.contains(&format!("### {}. ", section)), "section {section}");
        }
    }
}
